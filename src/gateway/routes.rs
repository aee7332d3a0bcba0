//! Endpoints served behind the rate limiter.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;

pub type ResponseBody = Full<Bytes>;

const WELCOME: &str = "Welcome to the service!";

/// Dispatch an admitted request.
pub fn route<B>(req: &Request<B>) -> Response<ResponseBody> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => text_response(StatusCode::OK, WELCOME),
        (&Method::GET, "/api/example") => {
            let body = serde_json::json!({ "message": "Rate limiter example" }).to_string();
            let mut resp = Response::new(Full::new(Bytes::from(body)));
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            resp
        }
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

/// Plain-text response with the given status.
pub fn text_response(status: StatusCode, body: &'static str) -> Response<ResponseBody> {
    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_string(resp: Response<ResponseBody>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[tokio::test]
    async fn test_welcome() {
        let resp = route(&get("/"));

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "Welcome to the service!");
    }

    #[tokio::test]
    async fn test_example_returns_json() {
        let resp = route(&get("/api/example"));

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_TYPE], "application/json");

        let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["message"], "Rate limiter example");
    }

    #[test]
    fn test_unknown_path_and_method() {
        assert_eq!(route(&get("/missing")).status(), StatusCode::NOT_FOUND);

        let post = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(())
            .unwrap();
        assert_eq!(route(&post).status(), StatusCode::NOT_FOUND);
    }
}

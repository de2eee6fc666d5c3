mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use common::{Part, multipart_request, page_texts, pdf_part, png, sample_pdf, test_app, text_part};
use http_body_util::BodyExt;
use pdf_unlocker_backend::services::document_crypto::is_protected_bytes;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn json_body(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_value(response: &Response, name: header::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_service_info_and_health() {
    let t = test_app();

    let response = send(&t.app, Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let info = json_body(response).await;
    assert_eq!(info["engine"], "lopdf");
    assert_eq!(info["endpoints"]["remove_password"], "/api/remove-password");

    let response = send(&t.app, Request::get("/api/health").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health = json_body(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "pdf-unlocker");
    assert_eq!(health["staging"], "ready");
}

#[tokio::test]
async fn test_check_protected_plain_document() {
    let t = test_app();
    let pdf = sample_pdf(1);

    let response = send(
        &t.app,
        multipart_request("/api/check-protected", &[pdf_part("plain.pdf", &pdf)]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let status = json_body(response).await;
    assert_eq!(status["is_protected"], false);
    assert_eq!(status["method_used"], "lopdf");
    assert_eq!(status["message"], "PDF is not password protected");

    // released immediately, no grace period
    assert_eq!(common::entry_count(t.dir.path()), 0);
}

#[tokio::test]
async fn test_add_then_remove_password() {
    let t = test_app();
    let pdf = sample_pdf(3);

    let response = send(
        &t.app,
        multipart_request(
            "/api/add-password",
            &[pdf_part("report.pdf", &pdf), text_part("password", "s3cret!")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_value(&response, header::CONTENT_TYPE), "application/pdf");
    assert!(
        header_value(&response, header::CONTENT_DISPOSITION)
            .contains("filename=\"report_protected.pdf\"")
    );
    let protected = body_bytes(response).await;
    assert!(is_protected_bytes(&protected).unwrap());

    let response = send(
        &t.app,
        multipart_request("/api/check-protected", &[pdf_part("report_protected.pdf", &protected)]),
    )
    .await;
    assert_eq!(json_body(response).await["is_protected"], true);

    let response = send(
        &t.app,
        multipart_request(
            "/api/remove-password",
            &[
                pdf_part("report_protected.pdf", &protected),
                text_part("password", "s3cret!"),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        header_value(&response, header::CONTENT_DISPOSITION)
            .contains("report_protected_unlocked.pdf")
    );
    let unlocked = body_bytes(response).await;
    assert!(!is_protected_bytes(&unlocked).unwrap());
    assert_eq!(page_texts(&unlocked), vec!["Page 1", "Page 2", "Page 3"]);

    assert!(common::wait_until_empty(t.dir.path(), Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_whitespace_owner_password_is_kept() {
    let t = test_app();
    let pdf = sample_pdf(1);

    let response = send(
        &t.app,
        multipart_request(
            "/api/add-password",
            &[
                pdf_part("report.pdf", &pdf),
                text_part("password", "reader-pass"),
                text_part("owner_password", "   "),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let protected = body_bytes(response).await;

    let response = send(
        &t.app,
        multipart_request(
            "/api/remove-password",
            &[pdf_part("report.pdf", &protected), text_part("password", "   ")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let unlocked = body_bytes(response).await;
    assert_eq!(page_texts(&unlocked), vec!["Page 1"]);
}

#[tokio::test]
async fn test_remove_password_rejections() {
    let t = test_app();
    let pdf = sample_pdf(1);

    let response = send(
        &t.app,
        multipart_request(
            "/api/add-password",
            &[pdf_part("report.pdf", &pdf), text_part("password", "correct")],
        ),
    )
    .await;
    let protected = body_bytes(response).await;

    let response = send(
        &t.app,
        multipart_request(
            "/api/remove-password",
            &[pdf_part("report.pdf", &protected), text_part("password", "incorrect")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "Invalid password or unsupported encryption method"
    );

    let response = send(
        &t.app,
        multipart_request(
            "/api/remove-password",
            &[pdf_part("report.docx", &pdf), text_part("password", "whatever")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "File must be a PDF");

    let response = send(
        &t.app,
        multipart_request("/api/remove-password", &[pdf_part("report.pdf", &pdf)]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &t.app,
        multipart_request("/api/remove-password", &[text_part("password", "whatever")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // failed requests leave nothing behind
    assert!(common::wait_until_empty(t.dir.path(), Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_add_password_rejections() {
    let t = test_app();
    let pdf = sample_pdf(1);

    let response = send(
        &t.app,
        multipart_request(
            "/api/add-password",
            &[pdf_part("report.pdf", &pdf), text_part("password", "abc")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "Password must be at least 4 characters long"
    );

    let response = send(
        &t.app,
        multipart_request(
            "/api/add-password",
            &[pdf_part("report.pdf", &pdf), text_part("password", "first")],
        ),
    )
    .await;
    let protected = body_bytes(response).await;

    let response = send(
        &t.app,
        multipart_request(
            "/api/add-password",
            &[pdf_part("report.pdf", &protected), text_part("password", "second")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "PDF is already password protected. Remove existing protection first."
    );
}

#[tokio::test]
async fn test_pdf_to_images_returns_zip() {
    let t = test_app();
    let pdf = sample_pdf(2);

    let response = send(
        &t.app,
        multipart_request(
            "/api/pdf-to-images",
            &[
                pdf_part("slides.pdf", &pdf),
                text_part("format", "JPEG"),
                text_part("dpi", "100"),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_value(&response, header::CONTENT_TYPE), "application/zip");
    assert!(
        header_value(&response, header::CONTENT_DISPOSITION).contains("slides_images.zip")
    );

    let bytes = body_bytes(response).await;
    let zip = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut names: Vec<&str> = zip.file_names().collect();
    names.sort();
    assert_eq!(names, vec!["page_001.jpg", "page_002.jpg"]);

    assert!(common::wait_until_empty(t.dir.path(), Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_pdf_to_images_validation() {
    let t = test_app();
    let pdf = sample_pdf(1);

    for (field, value) in [("dpi", "50"), ("dpi", "301"), ("format", "gif")] {
        let response = send(
            &t.app,
            multipart_request(
                "/api/pdf-to-images",
                &[pdf_part("slides.pdf", &pdf), text_part(field, value)],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}={}", field, value);
    }
}

#[tokio::test]
async fn test_pdf_to_images_protected_without_password() {
    let t = test_app();
    let pdf = sample_pdf(1);

    let response = send(
        &t.app,
        multipart_request(
            "/api/add-password",
            &[pdf_part("slides.pdf", &pdf), text_part("password", "hidden")],
        ),
    )
    .await;
    let protected = body_bytes(response).await;

    let response = send(
        &t.app,
        multipart_request("/api/pdf-to-images", &[pdf_part("slides.pdf", &protected)]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "PDF is password protected. Please provide the password."
    );

    let response = send(
        &t.app,
        multipart_request(
            "/api/pdf-to-images",
            &[pdf_part("slides.pdf", &protected), text_part("password", "hidden")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

fn image_part<'a>(file_name: &'a str, bytes: &'a [u8]) -> Part<'a> {
    Part::File {
        name: "files",
        file_name,
        content_type: "image/png",
        bytes,
    }
}

#[tokio::test]
async fn test_images_to_pdf() {
    let t = test_app();
    let a = png(120, 80);
    let b = png(80, 120);

    let response = send(
        &t.app,
        multipart_request(
            "/api/images-to-pdf",
            &[
                image_part("a.png", &a),
                image_part("b.png", &b),
                text_part("page_size", "LETTER"),
                text_part("orientation", "landscape"),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        header_value(&response, header::CONTENT_DISPOSITION).contains("converted_images.pdf")
    );

    let doc = lopdf::Document::load_mem(&body_bytes(response).await).unwrap();
    assert_eq!(doc.get_pages().len(), 2);

    assert!(common::wait_until_empty(t.dir.path(), Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_images_to_pdf_rejections() {
    let t = test_app();
    let tiny = png(4, 4);

    let response = send(
        &t.app,
        multipart_request("/api/images-to-pdf", &[text_part("page_size", "A4")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let names: Vec<String> = (0..51).map(|i| format!("img{}.png", i)).collect();
    let parts: Vec<Part<'_>> = names.iter().map(|n| image_part(n, &tiny)).collect();
    let response = send(&t.app, multipart_request("/api/images-to-pdf", &parts)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &t.app,
        multipart_request("/api/images-to-pdf", &[image_part("notes.txt", b"hello")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &t.app,
        multipart_request(
            "/api/images-to-pdf",
            &[image_part("a.png", &tiny), text_part("quality", "20")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &t.app,
        multipart_request("/api/images-to-pdf", &[image_part("broken.png", b"nope")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(common::wait_until_empty(t.dir.path(), Duration::from_secs(5)).await);
}

use distill_core::agentic::distill::classifier::{is_transient, parse_retry_delay};
use distill_core::infrastructure::ai::{
    FileReference, FileState, GeminiClient, GenerateRequest, GenerationProvider, Part,
    RequestConfig, SourceDocument, Turn,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Read one HTTP request (head plus `Content-Length` body) and return it as text.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.expect("read request");
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&data);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

async fn respond(socket: &mut TcpStream, status: &str, extra_headers: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        extra_headers,
        body.len(),
        body
    );
    socket
        .write_all(response.as_bytes())
        .await
        .expect("write response");
}

fn request() -> GenerateRequest {
    GenerateRequest {
        model: "gemini-2.5-pro".to_string(),
        contents: vec![Turn::user(vec![
            Part::file(FileReference {
                uri: "https://files/abc".to_string(),
                mime_type: Some("application/pdf".to_string()),
            }),
            Part::text("Begin"),
        ])],
        config: RequestConfig {
            system_instruction: "Distill the book.".to_string(),
            temperature: Some(1.0),
        },
    }
}

#[tokio::test]
async fn generate_reads_local_http_json() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind local test server");
    let addr = listener.local_addr().expect("local addr");

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept connection");
        let raw = read_request(&mut socket).await;
        let body = r###"{"candidates":[{"content":{"role":"model","parts":[{"text":"## Part 1"},{"text":" body"}]}}],"usageMetadata":{"candidatesTokenCount":42}}"###;
        respond(&mut socket, "200 OK", "", body).await;
        raw
    });

    let client = GeminiClient::with_base_url(format!("http://{}", addr), "test-key").expect("client");
    let response = client.generate(&request()).await.expect("generate succeeds");

    assert_eq!(response.text, "## Part 1 body");
    assert_eq!(response.candidates_token_count(), Some(42));

    let raw = server.await.expect("server task completes");
    assert!(raw.starts_with("POST /v1beta/models/gemini-2.5-pro:generateContent"));
    assert!(raw.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
    assert!(raw.contains(r#""systemInstruction":{"parts":[{"text":"Distill the book."}]}"#));
    assert!(raw.contains(r#""fileUri":"https://files/abc""#));
}

#[tokio::test]
async fn rate_limit_errors_keep_status_and_retry_hint() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind local test server");
    let addr = listener.local_addr().expect("local addr");

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept connection");
        let _ = read_request(&mut socket).await;
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        respond(&mut socket, "429 Too Many Requests", "Retry-After: 7\r\n", body).await;
    });

    let client = GeminiClient::with_base_url(format!("http://{}", addr), "test-key").expect("client");
    let err = client.generate(&request()).await.expect_err("generate fails");

    assert_eq!(err.http_status, Some(429));
    assert_eq!(err.message, "Resource has been exhausted");
    assert_eq!(err.provider_status(), Some("RESOURCE_EXHAUSTED"));
    assert!(is_transient(&err));
    assert_eq!(parse_retry_delay(&err), Some(Duration::from_secs(7)));

    server.await.expect("server task completes");
}

#[tokio::test]
async fn upload_follows_resumable_protocol() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind local test server");
    let addr = listener.local_addr().expect("local addr");

    let server = tokio::spawn(async move {
        let (mut start, _) = listener.accept().await.expect("accept start");
        let start_raw = read_request(&mut start).await;
        let upload_url = format!("X-Goog-Upload-URL: http://{}/upload/session/1\r\n", addr);
        respond(&mut start, "200 OK", &upload_url, "{}").await;
        drop(start);

        let (mut finish, _) = listener.accept().await.expect("accept finalize");
        let finish_raw = read_request(&mut finish).await;
        let body = r#"{"file":{"name":"files/abc","uri":"https://files/abc","mimeType":"application/pdf","state":"PROCESSING"}}"#;
        respond(&mut finish, "200 OK", "", body).await;
        (start_raw, finish_raw)
    });

    let client = GeminiClient::with_base_url(format!("http://{}", addr), "test-key").expect("client");
    let document = SourceDocument::new("book.pdf", "application/pdf", b"%PDF-1.4".to_vec());
    let file = client.upload_file(&document).await.expect("upload succeeds");

    assert_eq!(file.name, "files/abc");
    assert_eq!(file.state, FileState::Processing);

    let (start_raw, finish_raw) = server.await.expect("server task completes");
    assert!(start_raw.starts_with("POST /upload/v1beta/files"));
    assert!(start_raw.to_ascii_lowercase().contains("x-goog-upload-command: start"));
    assert!(finish_raw.starts_with("POST /upload/session/1"));
    assert!(finish_raw.to_ascii_lowercase().contains("x-goog-upload-command: upload, finalize"));
    assert!(finish_raw.ends_with("%PDF-1.4"));
}

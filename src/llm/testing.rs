//! One-shot HTTP server and a recording callback for the streaming clients' tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{mpsc, Mutex};
use std::thread;

use super::ChainCallback;

/// Answers a single request with `body`, then closes the connection.
///
/// Returns the server's base URL and a receiver yielding the raw request.
pub(crate) fn serve_once(status: u16, content_type: &'static str, body: Vec<u8>) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request = String::new();
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 { break; }
            if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                content_length = value.trim().parse().unwrap();
            }
            request.push_str(&line);
            if line == "\r\n" { break; }
        }
        let mut request_body = vec![0; content_length];
        reader.read_exact(&mut request_body).unwrap();
        request.push_str(&String::from_utf8_lossy(&request_body));
        let _ = tx.send(request);

        write!(stream, "HTTP/1.1 {status} Canned\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n").unwrap();
        stream.write_all(&body).unwrap();
        stream.flush().unwrap();
    });
    (format!("http://{addr}"), rx)
}

#[derive(Default)]
pub(crate) struct Recorder {
    pub tokens: Mutex<Vec<String>>,
    pub ended: Mutex<Option<String>>,
}

impl ChainCallback for Recorder {
    fn on_llm_new_token(&self, token: &str) { self.tokens.lock().unwrap().push(token.to_string()); }

    fn on_llm_end(&self, text: &str) { *self.ended.lock().unwrap() = Some(text.to_string()); }
}

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Request line and the headers the test server cares about.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body_len: usize,
    content_length: Option<usize>,
    chunked: bool,
}

pub enum Reply {
    Json(String),
    Status(u16),
    /// 200 with a body of `len` zero bytes.
    Body(usize),
    /// Sends the headers for `content_length` bytes, writes `sent` of them,
    /// then holds the connection open for `hold`.
    Stall {
        content_length: usize,
        sent: usize,
        hold: Duration,
    },
    /// Reads the body, waits `delay`, then answers with `status`.
    Delayed { status: u16, delay: Duration },
    /// Sends the headers for `content_length` bytes and `first` of them,
    /// waits `pause`, sends `then` more, then holds the connection for `hold`.
    Trickle {
        content_length: usize,
        first: usize,
        pause: Duration,
        then: usize,
        hold: Duration,
    },
    /// Closes the connection without reading the body or answering.
    Drop,
}

/// Minimal HTTP/1.1 server on an ephemeral local port. Every response
/// carries `Connection: close`.
pub struct TestServer {
    pub address: String,
    log: Arc<Mutex<Vec<Request>>>,
}

impl TestServer {
    pub async fn start<H>(handler: H) -> Self
    where
        H: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind test server");
        let address = format!("http://{}", listener.local_addr().unwrap());
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(handler);

        let accept_log = log.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = handler.clone();
                let log = accept_log.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, handler.as_ref(), &log).await;
                });
            }
        });

        Self { address, log }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().unwrap().clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

/// An address nothing listens on.
pub async fn refused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    address
}

pub fn service_data(json: &str) -> Reply {
    Reply::Json(json.to_string())
}

async fn serve<H>(stream: TcpStream, handler: &H, log: &Mutex<Vec<Request>>) -> io::Result<()>
where
    H: Fn(&Request) -> Reply,
{
    let mut reader = BufReader::new(stream);
    let Some(mut request) = read_head(&mut reader).await? else {
        return Ok(());
    };

    let reply = handler(&request);
    if matches!(reply, Reply::Drop) {
        log.lock().unwrap().push(request);
        return Ok(());
    }

    request.body_len = read_body(&mut reader, &request).await?;
    log.lock().unwrap().push(request);

    let mut stream = reader.into_inner();
    match reply {
        Reply::Json(body) => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(body.as_bytes()).await?;
        }
        Reply::Status(code) => write_status(&mut stream, code).await?,
        Reply::Delayed { status, delay } => {
            tokio::time::sleep(delay).await;
            write_status(&mut stream, status).await?;
        }
        Reply::Body(len) => {
            write_body_head(&mut stream, len).await?;
            write_zeros(&mut stream, len).await?;
        }
        Reply::Stall {
            content_length,
            sent,
            hold,
        } => {
            write_body_head(&mut stream, content_length).await?;
            write_zeros(&mut stream, sent).await?;
            stream.flush().await?;
            tokio::time::sleep(hold).await;
        }
        Reply::Trickle {
            content_length,
            first,
            pause,
            then,
            hold,
        } => {
            write_body_head(&mut stream, content_length).await?;
            write_zeros(&mut stream, first).await?;
            stream.flush().await?;
            tokio::time::sleep(pause).await;
            write_zeros(&mut stream, then).await?;
            stream.flush().await?;
            tokio::time::sleep(hold).await;
        }
        Reply::Drop => unreachable!(),
    }
    stream.flush().await?;
    stream.shutdown().await
}

async fn read_head(reader: &mut BufReader<TcpStream>) -> io::Result<Option<Request>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target, None),
    };

    let mut request = Request {
        method,
        path,
        query,
        body_len: 0,
        content_length: None,
        chunked: false,
    };

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => request.content_length = value.trim().parse().ok(),
                "transfer-encoding" => request.chunked = value.trim().eq_ignore_ascii_case("chunked"),
                _ => {}
            }
        }
    }
    Ok(Some(request))
}

async fn read_body(reader: &mut BufReader<TcpStream>, request: &Request) -> io::Result<usize> {
    if let Some(len) = request.content_length {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        return Ok(len);
    }
    if !request.chunked {
        return Ok(0);
    }

    let mut total = 0;
    let mut line = String::new();
    loop {
        line.clear();
        reader.read_line(&mut line).await?;
        let size_hex = line.trim_end().split(';').next().unwrap_or_default();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if size == 0 {
            // Trailers, then the terminating empty line.
            loop {
                line.clear();
                if reader.read_line(&mut line).await? == 0 || line.trim_end().is_empty() {
                    return Ok(total);
                }
            }
        }

        let mut chunk = vec![0u8; size];
        reader.read_exact(&mut chunk).await?;
        total += size;
        line.clear();
        reader.read_line(&mut line).await?;
    }
}

async fn write_status(stream: &mut TcpStream, code: u16) -> io::Result<()> {
    let head = format!("HTTP/1.1 {code} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(head.as_bytes()).await
}

async fn write_body_head(stream: &mut TcpStream, len: usize) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(head.as_bytes()).await
}

async fn write_zeros(stream: &mut TcpStream, mut len: usize) -> io::Result<()> {
    let block = [0u8; 16 * 1024];
    while len > 0 {
        let n = len.min(block.len());
        stream.write_all(&block[..n]).await?;
        len -= n;
    }
    Ok(())
}

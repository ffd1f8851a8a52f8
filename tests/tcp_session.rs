//! End-to-end runs over a real TCP socket.

use leninec::config::SessionConfig;
use leninec::network::server::{Server, ServerOps};
use leninec::network::tcp_transport::{MAX_FRAME_SIZE, TcpTransport, read_frame, send_framed};
use leninec::network::transport::Transport;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct TestServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

async fn start_server(session: SessionConfig) -> TestServer {
    let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), MAX_FRAME_SIZE)
        .await
        .unwrap();
    let addr = transport.local_addr();
    let server = Arc::new(Server::new(ServerOps {
        transports: vec![transport as Arc<dyn Transport>],
        session,
    }));
    let links = server.start().await.unwrap();
    let (stop, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(async move { server.serve(links, stop_rx).await });
    TestServer { addr, stop, handle }
}

fn fast() -> SessionConfig {
    SessionConfig {
        delay: Duration::ZERO,
        ..SessionConfig::default()
    }
}

async fn send(stream: &mut TcpStream, message: &str) {
    send_framed(stream, message.as_bytes()).await.unwrap();
}

async fn recv(stream: &mut TcpStream) -> Option<String> {
    timeout(Duration::from_secs(5), read_frame(stream, MAX_FRAME_SIZE))
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
}

async fn recv_all(stream: &mut TcpStream) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line) = recv(stream).await {
        lines.push(line);
    }
    lines
}

#[tokio::test]
async fn program_runs_to_completion() {
    let server = start_server(fast()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    send(&mut stream, "@d 0").await;
    send(&mut stream, "push 1\npush 2\nadd\nwrite").await;
    assert_eq!(
        recv_all(&mut stream).await,
        vec!["@s 1", "@p 1", "@s 1|2", "@p 2", "@s 3", "@p 3", "@s ", "@o 3", "@p 4", "@f"]
    );

    server.stop.send(()).unwrap();
    server.handle.await.unwrap();
}

#[tokio::test]
async fn macros_and_input_over_tcp() {
    let server = start_server(fast()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let source = "\
#define double
pop a
add a a
push a
#enddefine

read
double!
write
";
    send(&mut stream, source).await;
    assert_eq!(recv(&mut stream).await.as_deref(), Some("@i ?stack"));
    send(&mut stream, "21").await;

    let lines = recv_all(&mut stream).await;
    assert_eq!(lines.first().map(String::as_str), Some("@i 21"));
    assert!(lines.contains(&"@o 42".to_string()), "{lines:?}");
    assert_eq!(lines.last().map(String::as_str), Some("@f"));

    server.stop.send(()).unwrap();
    server.handle.await.unwrap();
}

#[tokio::test]
async fn decode_error_is_reported() {
    let server = start_server(fast()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    send(&mut stream, "push 1\njmp nowhere").await;
    let lines = recv_all(&mut stream).await;
    assert_eq!(
        lines,
        vec!["@e UndefinedLabel: line 2: label nowhere is not defined"]
    );

    server.stop.send(()).unwrap();
    server.handle.await.unwrap();
}

#[tokio::test]
async fn clients_are_served_concurrently() {
    let server = start_server(SessionConfig {
        delay: Duration::from_millis(20),
        ..SessionConfig::default()
    })
    .await;
    let mut a = TcpStream::connect(server.addr).await.unwrap();
    let mut b = TcpStream::connect(server.addr).await.unwrap();

    send(&mut a, "mov a 3\nl: sub a 1\njg a l\nwrite a").await;
    send(&mut b, "write 7").await;

    assert_eq!(recv_all(&mut b).await, vec!["@o 7", "@p 1", "@f"]);
    let lines = recv_all(&mut a).await;
    assert!(lines.contains(&"@o 0".to_string()), "{lines:?}");
    assert_eq!(lines.last().map(String::as_str), Some("@f"));

    server.stop.send(()).unwrap();
    server.handle.await.unwrap();
}

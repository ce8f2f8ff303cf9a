//! Four-letter admin words over the client port

use std::{net::SocketAddr, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

/// Send `word` to `addr` and return everything the server writes back.
///
/// The server closes the connection after answering, so the response is
/// read to the end. `limit` bounds connect, send and read together.
pub async fn send_word(addr: SocketAddr, word: &str, limit: Duration) -> std::io::Result<String> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(word.as_bytes()).await?;
        stream.flush().await?;

        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    };

    timeout(limit, exchange).await.map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("no answer to '{word}' from {addr} within {limit:?}"),
        )
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_word_reads_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut word = [0u8; 4];
            socket.read_exact(&mut word).await.unwrap();
            assert_eq!(&word, b"stat");
            socket.write_all(b"Mode: follower\n").await.unwrap();
        });

        let response = send_word(addr, "stat", Duration::from_secs(5)).await.unwrap();
        assert_eq!(response, "Mode: follower\n");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_word_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(send_word(addr, "stat", Duration::from_secs(5)).await.is_err());
    }
}

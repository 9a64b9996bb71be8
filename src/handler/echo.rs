//! Sample handler: greet the client, then echo bytes back

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{Connection, ConnectionHandler};
use crate::common::Result;

/// Byte that ends the conversation
const TERMINATOR: u8 = b'1';

/// Greets the peer by name and echoes its input until EOF, NUL or `'1'`
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl ConnectionHandler for EchoHandler {
    async fn handle(&self, conn: Connection) -> Result<()> {
        let Connection {
            mut reader,
            mut writer,
            peer_name,
            ..
        } = conn;

        writer
            .write_all(format!("Hello {}\n", peer_name).as_bytes())
            .await?;
        writer.flush().await?;

        loop {
            let byte = match reader.read_u8().await {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            if byte == 0 || byte == TERMINATOR {
                break;
            }
            writer.write_all(&[byte]).await?;
            writer.flush().await?;
        }

        writer.shutdown().await?;
        tracing::trace!(peer = %peer_name, "Echo conversation finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_greets_and_echoes_until_terminator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            let (reader, writer) = stream.into_split();
            EchoHandler
                .handle(Connection {
                    reader: BufReader::new(reader),
                    writer,
                    peer_addr,
                    peer_name: "client.example".to_string(),
                })
                .await
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut greeting = String::new();
        reader.read_line(&mut greeting).await.unwrap();
        assert_eq!(greeting, "Hello client.example\n");

        writer.write_all(b"abc1").await.unwrap();

        let mut echoed = String::new();
        reader.read_to_string(&mut echoed).await.unwrap();
        assert_eq!(echoed, "abc");

        server.await.unwrap().unwrap();
    }
}

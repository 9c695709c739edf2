//! Length-prefixed JSON framing
use crate::error::NetworkError;
use crate::protocol::NetworkMessage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_LEN: usize = 1024 * 1024;

pub async fn write_frame<W>(writer: &mut W, msg: &NetworkMessage) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    let json = msg.serialize()?;
    if json.len() > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge(json.len()));
    }
    let len = json.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<NetworkMessage>, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(NetworkMessage::deserialize(&buf)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageHeader;
    use blockmesh_core::BlockHash;

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let msg = NetworkMessage::ChainHeight {
            header: MessageHeader::new(1, BlockHash::digest(b"genesis")),
            height: 42,
        };

        write_frame(&mut client, &msg).await.unwrap();
        write_frame(&mut client, &msg).await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap(), Some(msg.clone()));
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(msg));
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_oversized_length_prefix() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes())
            .await
            .unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(NetworkError::FrameTooLarge(_))
        ));
    }
}

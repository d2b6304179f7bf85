//! Replay of recorded table files.
//!
//! A recording is a plain concatenation of sections. Each frame is read as a
//! 3-byte prefix (`table_id`, 4 reserved bits and the high length nibble,
//! low length byte) followed by `section_length` bytes.

use std::io;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt};
use log::{info, warn};
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};

use super::SectionStream;

/// Size of the frame prefix carrying the section length.
const FRAME_PREFIX_SIZE: usize = 3;

/// Splits a byte stream into sections.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionFrameCodec;

impl Decoder for SectionFrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_PREFIX_SIZE {
            return Ok(None);
        }

        let section_length = (((src[1] & 0x0F) as usize) << 8) | src[2] as usize;
        let frame_length = FRAME_PREFIX_SIZE + section_length;

        if src.len() < frame_length {
            src.reserve(frame_length - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(frame_length).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    warn!("SectionFrameCodec: dropping {} trailing bytes", src.len());
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

/// Frame sections from any reader.
pub fn frame_sections<R>(reader: R) -> SectionStream
where
    R: AsyncRead + Send + 'static,
{
    Box::pin(FramedRead::new(reader, SectionFrameCodec))
}

/// Replays one or more recorded table files in order.
#[derive(Debug, Clone)]
pub struct FileReplaySource {
    paths: Vec<PathBuf>,
}

impl FileReplaySource {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Open every file and chain their sections.
    pub async fn open(&self) -> io::Result<SectionStream> {
        let mut frames = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let file = File::open(path).await?;
            info!("Replaying sections from {}", path.display());
            frames.push(FramedRead::new(file, SectionFrameCodec));
        }
        Ok(Box::pin(stream::iter(frames).flatten()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame(table: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![table, 0xB0 | (payload.len() >> 8) as u8, payload.len() as u8];
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn test_decode_frames() {
        let mut src = BytesMut::new();
        src.extend_from_slice(&frame(0xBC, &[1, 2, 3]));
        src.extend_from_slice(&frame(0xBD, &[4])[..2]);

        let mut codec = SectionFrameCodec;
        let first = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&first[..], &[0xBC, 0xB0, 0x03, 1, 2, 3]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&frame(0xBD, &[4])[2..]);
        let second = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&second[..], &[0xBD, 0xB0, 0x01, 4]);
    }

    #[test]
    fn test_length_uses_low_nibble_only() {
        let mut src = BytesMut::from(&[0xBC, 0xF0, 0x01, 0xAA][..]);
        let frame = SectionFrameCodec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.len(), 4);
    }

    #[tokio::test]
    async fn test_trailing_partial_frame_dropped() {
        let mut data = frame(0xBC, &[1, 2]);
        data.extend_from_slice(&[0xBD, 0xB0, 0x10, 0x00]);

        let frames: Vec<_> = frame_sections(Cursor::new(data)).collect().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].as_ref().unwrap()[..], &[0xBC, 0xB0, 0x02, 1, 2]);
    }

    #[tokio::test]
    async fn test_replay_chains_files() {
        let dir = std::env::temp_dir().join(format!("fastscan-replay-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let network = dir.join("network.bin");
        let services = dir.join("services.bin");
        std::fs::write(&network, frame(0xBC, &[1])).unwrap();
        std::fs::write(&services, [frame(0xBD, &[2]), frame(0xBD, &[3])].concat()).unwrap();

        let source = FileReplaySource::new([network.clone(), services.clone()]);
        let tables: Vec<u8> = source
            .open()
            .await
            .unwrap()
            .map(|frame| frame.unwrap()[0])
            .collect()
            .await;
        assert_eq!(tables, vec![0xBC, 0xBD, 0xBD]);

        assert!(FileReplaySource::new([dir.join("missing.bin")]).open().await.is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

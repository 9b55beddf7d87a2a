use crate::error::SourceError;
use crate::frame::NodeStatsFrame;
use std::future::Future;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

/// Something that hands out stats frames for one node.
pub trait StatsSource {
    /// `Ok(None)` once the source has nothing more to give.
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Result<Option<NodeStatsFrame>, SourceError>> + Send;
}

/// Replays newline-delimited JSON frames.
pub struct ReplaySource<R> {
    lines: Lines<BufReader<R>>,
    line_no: usize,
}

impl ReplaySource<File> {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let file = File::open(path).await?;
        Ok(Self::new(file))
    }
}

impl<R: AsyncRead + Unpin> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line_no: 0,
        }
    }
}

impl<R: AsyncRead + Unpin + Send> StatsSource for ReplaySource<R> {
    async fn next_frame(&mut self) -> Result<Option<NodeStatsFrame>, SourceError> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return NodeStatsFrame::from_json(line)
                .map(Some)
                .map_err(|source| SourceError::Decode {
                    line: self.line_no,
                    source,
                });
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_frames_and_skips_blank_lines() {
        let input = "\n{\"Timestamp\": 1000000, \"Memory\": {}}\n\n{\"Timestamp\": 2000000, \"Memory\": {}}\n";
        let mut source = ReplaySource::new(input.as_bytes());
        assert_eq!(source.next_frame().await.unwrap().unwrap().timestamp, 1_000_000);
        assert_eq!(source.next_frame().await.unwrap().unwrap().timestamp, 2_000_000);
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reports_line_of_malformed_frame() {
        let input = "{\"Timestamp\": 1, \"Memory\": {}}\nnot json\n{\"Timestamp\": 3, \"Memory\": {}}\n";
        let mut source = ReplaySource::new(input.as_bytes());
        assert!(source.next_frame().await.unwrap().is_some());
        match source.next_frame().await {
            Err(SourceError::Decode { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected decode error, got {other:?}"),
        }
        assert_eq!(source.next_frame().await.unwrap().unwrap().timestamp, 3);
    }
}

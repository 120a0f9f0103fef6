//! JSON-lines live risk feed.
//!
//! Each non-blank line is one assessment payload for the newest session.
//! The stream ends at end of input.

use crate::error::FeedError;
use crate::models::{AssessmentPayload, RiskAssessment};
use crate::sources::{AssessmentStream, LiveRiskFeed};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info};

type LineReader = tokio::io::Lines<BufReader<Box<dyn AsyncRead + Unpin + Send>>>;

/// Live feed read from a file or stdin.
pub struct JsonLinesFeed {
    /// `None` reads stdin.
    path: Option<PathBuf>,
}

impl JsonLinesFeed {
    /// Feed from `source`; `-` means stdin.
    pub fn new(source: &str) -> Self {
        let path = if source == "-" {
            None
        } else {
            Some(PathBuf::from(source))
        };
        Self { path }
    }

    async fn open(&self) -> Result<Box<dyn AsyncRead + Unpin + Send>, FeedError> {
        match &self.path {
            None => Ok(Box::new(tokio::io::stdin())),
            Some(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    FeedError::Subscribe(format!("{}: {}", path.display(), e))
                })?;
                Ok(Box::new(file))
            }
        }
    }
}

#[async_trait]
impl LiveRiskFeed for JsonLinesFeed {
    async fn subscribe(&self) -> Result<AssessmentStream, FeedError> {
        let reader = self.open().await?;
        match &self.path {
            Some(path) => info!("Subscribed to live feed {}", path.display()),
            None => info!("Subscribed to live feed on stdin"),
        }

        let lines: LineReader = BufReader::new(reader).lines();
        let stream = stream::unfold((lines, 0usize), |(mut lines, mut line_no)| async move {
            loop {
                line_no += 1;
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let item = parse_line(&line, line_no);
                        return Some((item, (lines, line_no)));
                    }
                    Ok(None) => {
                        debug!("Live feed reached end of input");
                        return None;
                    }
                    Err(e) => {
                        return Some((Err(FeedError::Stream(e.to_string())), (lines, line_no)));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// Feed used when no live source is configured; ends immediately.
pub struct NoLiveFeed;

#[async_trait]
impl LiveRiskFeed for NoLiveFeed {
    async fn subscribe(&self) -> Result<AssessmentStream, FeedError> {
        debug!("No live feed configured");
        Ok(stream::empty().boxed())
    }
}

fn parse_line(line: &str, line_no: usize) -> Result<RiskAssessment, FeedError> {
    serde_json::from_str::<AssessmentPayload>(line)
        .map(AssessmentPayload::into_assessment)
        .map_err(|e| FeedError::Decode {
            line: line_no,
            reason: e.to_string(),
        })
}

//! Whitespace-separated block trace input.
//!
//! ```text
//! <total_blocks>
//! <start_block> <length_bytes> <R|W>
//! ...
//! ```
//!
//! Tokens may be split across lines arbitrarily; only their order matters.

use bcs_error::{BcsError, Result};
use bcs_types::{AccessOp, CacheKey};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::BufRead;

/// One traced request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub start: CacheKey,
    pub length_bytes: u64,
    pub op: AccessOp,
}

#[derive(Debug)]
pub struct TraceReader<R> {
    input: R,
    tokens: VecDeque<String>,
    line: String,
    records: u64,
    header_read: bool,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            tokens: VecDeque::new(),
            line: String::new(),
            records: 0,
            header_read: false,
        }
    }

    /// Records returned so far.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    fn next_token(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(token) = self.tokens.pop_front() {
                return Ok(Some(token));
            }
            self.line.clear();
            if self.input.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.tokens
                .extend(self.line.split_whitespace().map(str::to_owned));
        }
    }

    fn required(&mut self, record: u64, field: &str) -> Result<String> {
        self.next_token()?.ok_or_else(|| BcsError::Trace {
            record,
            detail: format!("truncated record: missing {field}"),
        })
    }

    /// Read the leading total block count. Must be called once, first.
    pub fn read_total_blocks(&mut self) -> Result<u64> {
        let token = self.next_token()?.ok_or_else(|| BcsError::Trace {
            record: 0,
            detail: "empty trace: missing total block count".to_owned(),
        })?;
        self.header_read = true;
        parse_u64(&token, 0, "total block count")
    }

    /// Next record, or `None` at end of input.
    pub fn next_record(&mut self) -> Result<Option<TraceRecord>> {
        if !self.header_read {
            return Err(BcsError::Trace {
                record: 0,
                detail: "records read before the total block count".to_owned(),
            });
        }
        let record = self.records + 1;
        let Some(start) = self.next_token()? else {
            return Ok(None);
        };
        let start = parse_u64(&start, record, "start block")?;
        let length = self.required(record, "length")?;
        let length_bytes = parse_u64(&length, record, "length")?;
        let op = self.required(record, "op")?;
        let op = op.parse::<AccessOp>().map_err(|err| BcsError::Trace {
            record,
            detail: format!("{op:?}: {err}"),
        })?;
        self.records = record;
        Ok(Some(TraceRecord {
            start: CacheKey(start),
            length_bytes,
            op,
        }))
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<TraceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn parse_u64(token: &str, record: u64, field: &str) -> Result<u64> {
    token.parse::<u64>().map_err(|err| BcsError::Trace {
        record,
        detail: format!("{field} {token:?}: {err}"),
    })
}

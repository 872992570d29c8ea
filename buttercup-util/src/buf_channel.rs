// Copyright 2024 The Buttercup Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes, BytesMut};
use buttercup_error::{make_err, Code, Error, ResultExt};
use futures::{Future, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};

/// Create a channel pair used to stream a single file's payload between a
/// provider and its caller (§4.1, §4.3). This is the "stream-shaped"
/// read/write API the provider contract is built on: a writer and a reader
/// half, joined so that a writer that disappears without sending an EOF is
/// reported to the reader as an error rather than a silent truncation.
pub fn make_buf_channel_pair() -> (DropCloserWriteHalf, DropCloserReadHalf) {
    let (tx, rx) = mpsc::channel(2);
    let (close_tx, close_rx) = oneshot::channel();
    (
        DropCloserWriteHalf {
            tx: Some(tx),
            bytes_written: 0,
            close_rx,
        },
        DropCloserReadHalf {
            rx,
            partial: None,
            close_tx: Some(close_tx),
        },
    )
}

/// Writer half of the pair.
pub struct DropCloserWriteHalf {
    tx: Option<mpsc::Sender<Result<Bytes, Error>>>,
    bytes_written: u64,
    close_rx: oneshot::Receiver<Result<(), Error>>,
}

impl DropCloserWriteHalf {
    /// Sends a chunk of data to the reader. Never send an empty buffer here;
    /// use [`Self::send_eof`] to end the stream.
    pub async fn send(&mut self, buf: Bytes) -> Result<(), Error> {
        let tx = self
            .tx
            .as_ref()
            .err_tip(|| "Tried to send while stream is closed")?;
        let buf_len = buf.len() as u64;
        if buf_len == 0 {
            return Err(make_err!(Code::Internal, "Cannot send EOF in send(). Use send_eof() instead"));
        }
        let result = tx
            .send(Ok(buf))
            .await
            .map_err(|_| make_err!(Code::Internal, "Failed to write data, receiver disconnected"));
        if result.is_err() {
            self.tx = None;
        }
        self.bytes_written += buf_len;
        result
    }

    /// Signals the reader that no more data is coming. Blocks until the
    /// reader acknowledges it received the EOF cleanly.
    pub async fn send_eof(&mut self) -> Result<(), Error> {
        self.tx = None;
        Pin::new(&mut self.close_rx)
            .await
            .map_err(|_| make_err!(Code::Internal, "Receiver went away before receiving EOF"))?
    }

    /// Number of bytes sent so far (not necessarily yet consumed).
    pub fn get_bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Drop for DropCloserWriteHalf {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            // The writer was dropped before an EOF was sent: let the reader
            // know so it doesn't mistake a truncated stream for a complete one.
            tokio::spawn(async move {
                let _ = tx
                    .send(Err(make_err!(Code::Internal, "Writer was dropped before EOF was sent")))
                    .await;
            });
        }
    }
}

/// Reader half of the pair.
pub struct DropCloserReadHalf {
    rx: mpsc::Receiver<Result<Bytes, Error>>,
    partial: Option<Result<Bytes, Error>>,
    close_tx: Option<oneshot::Sender<Result<(), Error>>>,
}

impl DropCloserReadHalf {
    /// Receives the next chunk. Returns an empty `Bytes` on a clean EOF.
    pub async fn recv(&mut self) -> Result<Bytes, Error> {
        let maybe_chunk = match self.partial.take() {
            Some(result) => Some(result),
            None => self.rx.recv().await,
        };
        match maybe_chunk {
            Some(Ok(chunk)) => Ok(chunk),
            Some(Err(e)) => Err(e),
            None => {
                if let Some(close_tx) = self.close_tx.take() {
                    close_tx
                        .send(Ok(()))
                        .map_err(|_| make_err!(Code::Internal, "Failed to ack EOF to writer"))?;
                }
                Ok(Bytes::new())
            }
        }
    }

    /// Drains the stream into one contiguous buffer.
    pub async fn collect_all_with_size_hint(mut self, size_hint: usize) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(size_hint);
        loop {
            let chunk = self
                .recv()
                .await
                .err_tip(|| "Failed to recv in collect_all_with_size_hint")?;
            if chunk.is_empty() {
                break;
            }
            buf.put(chunk);
        }
        Ok(buf.freeze())
    }
}

impl Stream for DropCloserReadHalf {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Box::pin(self.recv()).as_mut().poll(cx).map(|result| match result {
            Ok(bytes) => {
                if bytes.is_empty() {
                    None
                } else {
                    Some(Ok(bytes))
                }
            }
            Err(e) => Some(Err(e.to_std_err())),
        })
    }
}

/// Reads an entire [`DropCloserReadHalf`] into a `Vec<u8>`. Convenience used
/// by providers that need the whole payload in memory (e.g. the in-memory
/// provider, or the codec which processes a stream end-to-end per §4.1).
pub async fn read_to_end(reader: DropCloserReadHalf) -> Result<Vec<u8>, Error> {
    let bytes = reader.collect_all_with_size_hint(4096).await?;
    Ok(bytes.to_vec())
}

/// Adapts a byte slice into a [`DropCloserReadHalf`] by spawning a forwarding
/// task. Used by tests and by providers reading a payload already fully
/// buffered in memory.
pub fn reader_from_bytes(data: Bytes) -> DropCloserReadHalf {
    let (mut tx, rx) = make_buf_channel_pair();
    tokio::spawn(async move {
        if !data.is_empty() {
            if tx.send(data).await.is_err() {
                return;
            }
        }
        let _ = tx.send_eof().await;
    });
    rx
}

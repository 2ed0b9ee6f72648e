//! On-disk buffet format.
//!
//! A buffet file is a stream of two JSON values: the status array, then the
//! parameter grid. The whole stream may be gzip compressed. Readers decide
//! by probing for the gzip magic bytes; when a stream carries the magic but
//! does not inflate, the raw bytes are parsed instead. A stream that stops
//! after the status array is a legacy buffet and loads without a grid.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tracing::warn;

use tb_grid::ParamGrid;
use tb_types::{BuffetError, BuffetResult, TaskStatus};

use crate::buffet::Buffet;

/// First two bytes of every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

pub fn encode(buffet: &Buffet, compress: bool) -> BuffetResult<Vec<u8>> {
    let mut raw = Vec::new();
    serde_json::to_writer(&mut raw, buffet.statuses())?;
    raw.push(b'\n');
    if let Some(grid) = buffet.grid() {
        serde_json::to_writer(&mut raw, grid)?;
        raw.push(b'\n');
    }

    if !compress {
        return Ok(raw);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

pub fn decode(bytes: &[u8]) -> BuffetResult<Buffet> {
    if is_compressed(bytes) {
        let mut raw = Vec::new();
        match GzDecoder::new(bytes).read_to_end(&mut raw) {
            Ok(_) => return decode_raw(&raw),
            Err(err) => warn!(
                "Buffet has a gzip header but does not inflate ({}), reading it raw",
                err
            ),
        }
    }
    decode_raw(bytes)
}

fn decode_raw(bytes: &[u8]) -> BuffetResult<Buffet> {
    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<serde_json::Value>();

    let statuses: Vec<TaskStatus> = match stream.next() {
        Some(Ok(value)) => serde_json::from_value(value).map_err(|err| BuffetError::Codec {
            message: format!("invalid status array: {err}"),
        })?,
        Some(Err(err)) => {
            return Err(BuffetError::Codec {
                message: format!("unreadable status array: {err}"),
            })
        }
        None => {
            return Err(BuffetError::Codec {
                message: "empty buffet file".to_string(),
            })
        }
    };

    let grid = match stream.next() {
        None => {
            warn!(
                "Buffet carries no parameter grid, it could be an old buffet; \
                 no new tasks can be launched from it"
            );
            None
        }
        Some(Ok(value)) => match serde_json::from_value::<ParamGrid>(value) {
            Ok(grid) => match grid.validate() {
                Ok(()) => Some(grid),
                Err(err) => {
                    warn!(
                        "Buffet grid is malformed ({}); no new tasks can be launched from it",
                        err
                    );
                    None
                }
            },
            Err(err) => {
                warn!("Unable to load buffet grid ({}); no new tasks can be launched from it", err);
                None
            }
        },
        Some(Err(err)) => {
            warn!("Unable to read buffet grid ({}); no new tasks can be launched from it", err);
            None
        }
    };

    Buffet::from_parts(statuses, grid)
}

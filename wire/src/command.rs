//! The query-name grammar.
//!
//! Every query the server answers spells a command in the labels left of
//! the configured suffix:
//!
//! ```text
//! msg.<sid>.<idx>.<total>.<payload>.<suffix>   record one inbound chunk
//! get.<sid>.<idx>.<suffix>                     fetch one outbound chunk
//! cnt.<sid>.<suffix>                           poll produced count + state
//! clr.<sid>.<suffix>                           reset the session
//! tst.<suffix>                                 health probe
//! ```
//!
//! Parsing is a single `TryFrom`-style step into a tagged variant; the
//! DNS handler matches on the result once. The inverse direction
//! ([`Command::to_name`]) is what the client stub emits, so the grammar
//! round-trips through one pair of functions.

use crate::encode;
use crate::error::NameError;

/// Upper bound on chunks per inbound message. Bounds per-session
/// reassembly memory and keeps `idx`/`total` within four digits.
pub const MAX_CHUNKS: u16 = 2048;

const SID_MAX_LEN: usize = 8;

/// One parsed tunnel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Deliver inbound chunk `idx` of `total` for session `sid`.
    Msg {
        sid: String,
        idx: u16,
        total: u16,
        payload: Vec<u8>,
    },
    /// Read outbound chunk `idx` for session `sid`.
    Get { sid: String, idx: u16 },
    /// Report produced chunk count and turn state for session `sid`.
    Cnt { sid: String },
    /// Drop session history and buffers.
    Clr { sid: String },
    /// Health probe.
    Tst,
}

impl Command {
    /// Parse the labels left of the suffix. Labels are expected in wire
    /// order (command verb first) and already case-folded by the DNS
    /// layer.
    pub fn parse(labels: &[&str]) -> Result<Command, NameError> {
        let (&verb, rest) = labels.split_first().ok_or(NameError::Empty)?;
        match verb {
            "msg" => match rest {
                [sid, idx, total, payload] => {
                    let sid = parse_sid(sid)?;
                    let (idx, total) = parse_indices(idx, total)?;
                    if payload.is_empty() || payload.len() > crate::MAX_LABEL_LEN {
                        return Err(NameError::BadPayload);
                    }
                    let payload =
                        encode::decode_label(payload).map_err(|_| NameError::BadPayload)?;
                    Ok(Command::Msg {
                        sid,
                        idx,
                        total,
                        payload,
                    })
                }
                _ => Err(NameError::BadShape),
            },
            "get" => match rest {
                [sid, idx] => Ok(Command::Get {
                    sid: parse_sid(sid)?,
                    idx: idx.parse().map_err(|_| NameError::BadIndex)?,
                }),
                _ => Err(NameError::BadShape),
            },
            "cnt" => match rest {
                [sid] => Ok(Command::Cnt {
                    sid: parse_sid(sid)?,
                }),
                _ => Err(NameError::BadShape),
            },
            "clr" => match rest {
                [sid] => Ok(Command::Clr {
                    sid: parse_sid(sid)?,
                }),
                _ => Err(NameError::BadShape),
            },
            "tst" => match rest {
                [] => Ok(Command::Tst),
                _ => Err(NameError::BadShape),
            },
            other => Err(NameError::UnknownCommand(other.to_string())),
        }
    }

    /// Render the full query name for this command under `suffix`,
    /// without the trailing root dot.
    pub fn to_name(&self, suffix: &str) -> String {
        match self {
            Command::Msg {
                sid,
                idx,
                total,
                payload,
            } => format!(
                "msg.{}.{}.{}.{}.{}",
                sid,
                idx,
                total,
                encode::encode_label(payload),
                suffix
            ),
            Command::Get { sid, idx } => format!("get.{}.{}.{}", sid, idx, suffix),
            Command::Cnt { sid } => format!("cnt.{}.{}", sid, suffix),
            Command::Clr { sid } => format!("clr.{}.{}", sid, suffix),
            Command::Tst => format!("tst.{}", suffix),
        }
    }
}

fn parse_sid(label: &str) -> Result<String, NameError> {
    if label.is_empty()
        || label.len() > SID_MAX_LEN
        || !label.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(NameError::BadSession);
    }
    Ok(label.to_ascii_lowercase())
}

fn parse_indices(idx: &str, total: &str) -> Result<(u16, u16), NameError> {
    let idx: u16 = idx.parse().map_err(|_| NameError::BadIndex)?;
    let total: u16 = total.parse().map_err(|_| NameError::BadIndex)?;
    if total == 0 || total > MAX_CHUNKS || idx >= total {
        return Err(NameError::BadIndex);
    }
    Ok((idx, total))
}

/// Turn state as reported by `cnt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Generating,
    Complete,
    Error,
}

impl TurnPhase {
    fn code(self) -> char {
        match self {
            TurnPhase::Generating => 'g',
            TurnPhase::Complete => 'c',
            TurnPhase::Error => 'e',
        }
    }
}

/// Render the `cnt` reply tuple, e.g. `"3,g"`.
pub fn format_status(produced: usize, phase: TurnPhase) -> String {
    format!("{},{}", produced, phase.code())
}

/// Parse a `cnt` reply tuple.
pub fn parse_status(reply: &str) -> Result<(usize, TurnPhase), NameError> {
    let (count, code) = reply.split_once(',').ok_or(NameError::BadShape)?;
    let produced = count.parse().map_err(|_| NameError::BadShape)?;
    let phase = match code {
        "g" => TurnPhase::Generating,
        "c" => TurnPhase::Complete,
        "e" => TurnPhase::Error,
        _ => return Err(NameError::BadShape),
    };
    Ok((produced, phase))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(name: &str) -> Vec<&str> {
        name.split('.').collect()
    }

    #[test]
    fn parse_msg() {
        let payload = encode::encode_label(b"hello");
        let name = format!("msg.ab12.0.3.{}", payload);
        assert_eq!(
            Command::parse(&labels(&name)).unwrap(),
            Command::Msg {
                sid: "ab12".to_string(),
                idx: 0,
                total: 3,
                payload: b"hello".to_vec(),
            }
        );
    }

    #[test]
    fn parse_simple_commands() {
        assert_eq!(
            Command::parse(&["get", "ab", "7"]).unwrap(),
            Command::Get {
                sid: "ab".to_string(),
                idx: 7
            }
        );
        assert_eq!(
            Command::parse(&["cnt", "ab"]).unwrap(),
            Command::Cnt {
                sid: "ab".to_string()
            }
        );
        assert_eq!(
            Command::parse(&["clr", "ab"]).unwrap(),
            Command::Clr {
                sid: "ab".to_string()
            }
        );
        assert_eq!(Command::parse(&["tst"]).unwrap(), Command::Tst);
    }

    #[test]
    fn unknown_verb_rejected() {
        assert!(matches!(
            Command::parse(&["upd", "ab"]),
            Err(NameError::UnknownCommand(_))
        ));
    }

    #[test]
    fn empty_rejected() {
        assert_eq!(Command::parse(&[]), Err(NameError::Empty));
    }

    #[test]
    fn sid_constraints() {
        assert!(Command::parse(&["cnt", "toolong123"]).is_err());
        assert!(Command::parse(&["cnt", ""]).is_err());
        assert!(Command::parse(&["cnt", "bad-sid"]).is_err());
        // Case-folded on the way in.
        assert_eq!(
            Command::parse(&["cnt", "AB12"]).unwrap(),
            Command::Cnt {
                sid: "ab12".to_string()
            }
        );
    }

    #[test]
    fn index_constraints() {
        let payload = encode::encode_label(b"x");
        let payload = payload.as_str();
        // idx >= total
        assert_eq!(
            Command::parse(&["msg", "ab", "3", "3", payload]),
            Err(NameError::BadIndex)
        );
        // total == 0
        assert_eq!(
            Command::parse(&["msg", "ab", "0", "0", payload]),
            Err(NameError::BadIndex)
        );
        // total over the chunk cap
        assert_eq!(
            Command::parse(&["msg", "ab", "0", "2049", payload]),
            Err(NameError::BadIndex)
        );
        assert_eq!(
            Command::parse(&["msg", "ab", "0", "junk", payload]),
            Err(NameError::BadIndex)
        );
    }

    #[test]
    fn wrong_shape_rejected() {
        assert_eq!(
            Command::parse(&["get", "ab"]),
            Err(NameError::BadShape)
        );
        assert_eq!(
            Command::parse(&["tst", "extra"]),
            Err(NameError::BadShape)
        );
        assert_eq!(
            Command::parse(&["msg", "ab", "0", "1"]),
            Err(NameError::BadShape)
        );
    }

    #[test]
    fn bad_payload_rejected() {
        assert_eq!(
            Command::parse(&["msg", "ab", "0", "1", "!!"]),
            Err(NameError::BadPayload)
        );
    }

    #[test]
    fn name_round_trip() {
        let cmd = Command::Msg {
            sid: "ferret1".to_string(),
            idx: 4,
            total: 9,
            payload: vec![1, 2, 3, 4, 5],
        };
        let name = cmd.to_name("llm.example.com");
        let prefix: Vec<&str> = name
            .strip_suffix(".llm.example.com")
            .unwrap()
            .split('.')
            .collect();
        assert_eq!(Command::parse(&prefix).unwrap(), cmd);
    }

    #[test]
    fn status_round_trip() {
        for phase in [TurnPhase::Generating, TurnPhase::Complete, TurnPhase::Error] {
            let reply = format_status(12, phase);
            assert_eq!(parse_status(&reply).unwrap(), (12, phase));
        }
        assert!(parse_status("nope").is_err());
        assert!(parse_status("3,x").is_err());
    }
}

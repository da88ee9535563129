//! Line-oriented text protocol of the dictionary device.
//!
//! One request per line, space separated. Keys and values are typed
//! literals in `tag:payload` form (`bool`, `int`, `ip4`, `ip6`, `mac`,
//! `string`, `bytes`); key literals are reduced to their byte form, so
//! `int:7` addresses the same entry the core writes for ctid 7.
//!
//! ```text
//! set <table> <key> <field> <value>
//! get <table> <key> <field>
//! get_all <table> <key>
//! get_fields <table> <key>
//! delete <table> [<key> [<field>]]
//! ```

use domain::dict::entity::DictValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,

    #[error("unknown verb: {0}")]
    UnknownVerb(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("trailing arguments after {0}")]
    TrailingArguments(&'static str),

    #[error(transparent)]
    Value(#[from] domain::common::error::DomainError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Set {
        table: String,
        key: Vec<u8>,
        field: String,
        value: DictValue,
    },
    Get {
        table: String,
        key: Vec<u8>,
        field: String,
    },
    GetAll {
        table: String,
        key: Vec<u8>,
    },
    GetFields {
        table: String,
        key: Vec<u8>,
    },
    DeleteField {
        table: String,
        key: Vec<u8>,
        field: String,
    },
    DeleteKey {
        table: String,
        key: Vec<u8>,
    },
    DeleteTable {
        table: String,
    },
}

pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().ok_or(ProtocolError::Empty)?;

    match verb {
        "set" => {
            let table = next_arg(&mut parts, "table")?;
            let key = parse_key(parts.next())?;
            let field = next_arg(&mut parts, "field")?;
            let value: DictValue = parts
                .next()
                .ok_or(ProtocolError::MissingArgument("value"))?
                .parse()?;
            expect_end(parts.next(), "value")?;
            Ok(Request::Set {
                table,
                key,
                field,
                value,
            })
        }
        "get" => {
            let table = next_arg(&mut parts, "table")?;
            let key = parse_key(parts.next())?;
            let field = next_arg(&mut parts, "field")?;
            expect_end(parts.next(), "field")?;
            Ok(Request::Get { table, key, field })
        }
        "get_all" => {
            let table = next_arg(&mut parts, "table")?;
            let key = parse_key(parts.next())?;
            expect_end(parts.next(), "key")?;
            Ok(Request::GetAll { table, key })
        }
        "get_fields" => {
            let table = next_arg(&mut parts, "table")?;
            let key = parse_key(parts.next())?;
            expect_end(parts.next(), "key")?;
            Ok(Request::GetFields { table, key })
        }
        "delete" => {
            let table = next_arg(&mut parts, "table")?;
            match parts.next() {
                None => Ok(Request::DeleteTable { table }),
                Some(key_literal) => {
                    let key = parse_key(Some(key_literal))?;
                    match parts.next() {
                        None => Ok(Request::DeleteKey { table, key }),
                        Some(field) => {
                            expect_end(parts.next(), "field")?;
                            Ok(Request::DeleteField {
                                table,
                                key,
                                field: field.to_owned(),
                            })
                        }
                    }
                }
            }
        }
        other => Err(ProtocolError::UnknownVerb(other.to_owned())),
    }
}

fn next_arg(
    parts: &mut std::str::SplitWhitespace<'_>,
    name: &'static str,
) -> Result<String, ProtocolError> {
    parts
        .next()
        .map(str::to_owned)
        .ok_or(ProtocolError::MissingArgument(name))
}

fn parse_key(literal: Option<&str>) -> Result<Vec<u8>, ProtocolError> {
    let literal = literal.ok_or(ProtocolError::MissingArgument("key"))?;
    let value: DictValue = literal.parse()?;
    Ok(value.to_key_bytes())
}

fn expect_end(next: Option<&str>, after: &'static str) -> Result<(), ProtocolError> {
    match next {
        None => Ok(()),
        Some(_) => Err(ProtocolError::TrailingArguments(after)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_with_typed_value() {
        let request = parse_request("set sessions int:7 bypass_packetd bool:true").unwrap();
        assert_eq!(
            request,
            Request::Set {
                table: "sessions".to_owned(),
                key: 7u32.to_be_bytes().to_vec(),
                field: "bypass_packetd".to_owned(),
                value: DictValue::Bool(true),
            }
        );
    }

    #[test]
    fn parses_get() {
        let request = parse_request("get host ip4:10.0.0.5 country").unwrap();
        assert_eq!(
            request,
            Request::Get {
                table: "host".to_owned(),
                key: vec![10, 0, 0, 5],
                field: "country".to_owned(),
            }
        );
    }

    #[test]
    fn parses_get_all_and_get_fields() {
        assert!(matches!(
            parse_request("get_all sessions int:7").unwrap(),
            Request::GetAll { .. }
        ));
        assert!(matches!(
            parse_request("get_fields device mac:aa:bb:cc:dd:ee:ff").unwrap(),
            Request::GetFields { .. }
        ));
    }

    #[test]
    fn delete_arity_selects_scope() {
        assert_eq!(
            parse_request("delete sessions").unwrap(),
            Request::DeleteTable {
                table: "sessions".to_owned()
            }
        );
        assert!(matches!(
            parse_request("delete sessions int:7").unwrap(),
            Request::DeleteKey { .. }
        ));
        assert!(matches!(
            parse_request("delete sessions int:7 bypass_packetd").unwrap(),
            Request::DeleteField { .. }
        ));
    }

    #[test]
    fn user_keys_are_utf8_bytes() {
        let request = parse_request("get user string:alice quota").unwrap();
        assert_eq!(
            request,
            Request::Get {
                table: "user".to_owned(),
                key: b"alice".to_vec(),
                field: "quota".to_owned(),
            }
        );
    }

    #[test]
    fn malformed_requests_rejected() {
        assert!(matches!(parse_request(""), Err(ProtocolError::Empty)));
        assert!(matches!(
            parse_request("frobnicate sessions"),
            Err(ProtocolError::UnknownVerb(_))
        ));
        assert!(matches!(
            parse_request("set sessions"),
            Err(ProtocolError::MissingArgument("key"))
        ));
        assert!(matches!(
            parse_request("set sessions int:7 field"),
            Err(ProtocolError::MissingArgument("value"))
        ));
        assert!(matches!(
            parse_request("get sessions int:7 field extra"),
            Err(ProtocolError::TrailingArguments(_))
        ));
        assert!(matches!(
            parse_request("set sessions int:x f bool:true"),
            Err(ProtocolError::Value(_))
        ));
    }
}

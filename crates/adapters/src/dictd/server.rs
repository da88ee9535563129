//! Dictionary device server.
//!
//! Serves the line protocol on a unix socket so kernel-side tooling and
//! operators can read and write the shared dictionary. Responses are
//! line-oriented: `OK` for mutations, `VALUE <literal>` / `MISSING` for
//! lookups, `FIELD ...` lines terminated by `OK` for enumerations, and
//! `ERR <message>` for malformed requests (which change nothing).

use std::path::PathBuf;
use std::sync::Arc;

use domain::dict::store::Dictionary;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use super::protocol::{Request, parse_request};

/// Bind the dictionary socket and serve until cancelled.
pub async fn run_dict_server(
    dict: Arc<Dictionary>,
    socket_path: PathBuf,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // A stale socket file from a previous run blocks the bind.
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    tracing::info!(path = %socket_path.display(), "dictionary device listening");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let dict = Arc::clone(&dict);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, dict, cancel).await {
                                tracing::debug!(%err, "dictionary connection closed with error");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!(%err, "dictionary accept failed");
                    }
                }
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    tracing::info!("dictionary device stopped");
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    dict: Arc<Dictionary>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let response = match parse_request(&line) {
            Ok(request) => execute(&dict, request),
            Err(err) => {
                tracing::warn!(%err, "ignoring malformed dictionary request");
                format!("ERR {err}\n")
            }
        };
        writer.write_all(response.as_bytes()).await?;
    }

    Ok(())
}

fn execute(dict: &Dictionary, request: Request) -> String {
    match request {
        Request::Set {
            table,
            key,
            field,
            value,
        } => {
            dict.set(&table, &key, &field, value);
            "OK\n".to_owned()
        }
        Request::Get { table, key, field } => match dict.get(&table, &key, &field) {
            Some(value) => format!("VALUE {value}\n"),
            None => "MISSING\n".to_owned(),
        },
        Request::GetAll { table, key } => match dict.get_all(&table, &key) {
            Some(fields) => {
                let mut sorted: Vec<_> = fields.into_iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                let mut out = String::new();
                for (field, value) in sorted {
                    out.push_str(&format!("FIELD {field} {value}\n"));
                }
                out.push_str("OK\n");
                out
            }
            None => "MISSING\n".to_owned(),
        },
        Request::GetFields { table, key } => match dict.get_fields(&table, &key) {
            Some(mut fields) => {
                fields.sort();
                let mut out = String::new();
                for field in fields {
                    out.push_str(&format!("FIELD {field}\n"));
                }
                out.push_str("OK\n");
                out
            }
            None => "MISSING\n".to_owned(),
        },
        Request::DeleteField { table, key, field } => {
            dict.delete_field(&table, &key, &field);
            "OK\n".to_owned()
        }
        Request::DeleteKey { table, key } => {
            dict.delete_key(&table, &key);
            "OK\n".to_owned()
        }
        Request::DeleteTable { table } => {
            dict.delete_table(&table);
            "OK\n".to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::dict::entity::DictValue;

    fn dict() -> Dictionary {
        Dictionary::new()
    }

    // ── execute ───────────────────────────────────────────────────

    #[test]
    fn set_then_get_roundtrips_through_protocol() {
        let d = dict();
        let set = parse_request("set sessions int:7 bypass_packetd bool:true").unwrap();
        assert_eq!(execute(&d, set), "OK\n");
        assert!(d.session_bypassed(7));

        let get = parse_request("get sessions int:7 bypass_packetd").unwrap();
        assert_eq!(execute(&d, get), "VALUE bool:true\n");
    }

    #[test]
    fn get_missing_reports_missing() {
        let d = dict();
        let get = parse_request("get sessions int:7 bypass_packetd").unwrap();
        assert_eq!(execute(&d, get), "MISSING\n");
    }

    #[test]
    fn get_all_lists_fields_sorted() {
        let d = dict();
        d.set_session_field(7, "b_field", DictValue::Int(2));
        d.set_session_field(7, "a_field", DictValue::Int(1));

        let get_all = parse_request("get_all sessions int:7").unwrap();
        assert_eq!(
            execute(&d, get_all),
            "FIELD a_field int:1\nFIELD b_field int:2\nOK\n"
        );

        let get_fields = parse_request("get_fields sessions int:7").unwrap();
        assert_eq!(execute(&d, get_fields), "FIELD a_field\nFIELD b_field\nOK\n");
    }

    #[test]
    fn delete_variants_mutate_store() {
        let d = dict();
        d.set_session_field(7, "a", DictValue::Int(1));
        d.set_session_field(7, "b", DictValue::Int(2));
        d.set_session_field(8, "a", DictValue::Int(3));

        execute(&d, parse_request("delete sessions int:7 a").unwrap());
        assert!(d.session_field(7, "a").is_none());
        assert!(d.session_field(7, "b").is_some());

        execute(&d, parse_request("delete sessions int:7").unwrap());
        assert!(d.session_field(7, "b").is_none());

        execute(&d, parse_request("delete sessions").unwrap());
        assert!(d.session_field(8, "a").is_none());
    }

    // ── socket serving ────────────────────────────────────────────

    #[tokio::test]
    async fn serves_requests_over_unix_socket() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.sock");
        let dict = Arc::new(Dictionary::new());
        let cancel = CancellationToken::new();

        let server = tokio::spawn(run_dict_server(
            Arc::clone(&dict),
            path.clone(),
            cancel.clone(),
        ));

        // Wait for the socket to appear.
        for _ in 0..100 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"set sessions int:7 bypass_packetd bool:true\n")
            .await
            .unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "OK");

        writer
            .write_all(b"get sessions int:7 bypass_packetd\n")
            .await
            .unwrap();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "VALUE bool:true"
        );

        writer.write_all(b"nonsense request\n").await.unwrap();
        let err_line = lines.next_line().await.unwrap().unwrap();
        assert!(err_line.starts_with("ERR "));

        assert!(dict.session_bypassed(7));

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}

//! TeamSpeak 3 ServerQuery over TCP.
//!
//! Line-oriented protocol on the query port (default 10011): `use port=N`
//! selects the virtual server by voice port, then `serverinfo` /
//! `clientlist` / `channellist` return `key=value` pairs separated by
//! spaces, entries separated by `|`, with ServerQuery escaping.
//!
//! Port roles depend on how the row was written. Rows with the legacy
//! `teamspeakQueryPort` extra store the voice port as the primary port and
//! the ServerQuery port in the extra; newer rows store the ServerQuery port
//! as the primary port and the voice port in the `voice_port` extra.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::BufReader;

use crate::error::ProbeError;
use crate::net::{tcp, Pinger};
use crate::probe::{Player, Probe};
use crate::target::ProbeTarget;
use crate::Strategy;

pub struct Teamspeak3 {
    timeout: Duration,
}

impl Teamspeak3 {
    pub fn new(timeout: Duration) -> Self {
        Teamspeak3 { timeout }
    }
}

fn parse_port(raw: &str) -> Result<u16, ProbeError> {
    raw.trim()
        .parse()
        .map_err(|_| ProbeError::InvalidInput(format!("bad teamspeak port {raw:?}")))
}

/// Resolve `(query_port, voice_port)` for a monitor row.
///
/// Rows carrying the legacy `teamspeakQueryPort` extra keep the voice port
/// in the primary field; newer rows keep the ServerQuery port there and the
/// voice port in the `voice_port` extra.
fn select_ports(target: &ProbeTarget) -> Result<(u16, u16), ProbeError> {
    match target.extra("teamspeakQueryPort") {
        Some(query) => Ok((parse_port(query)?, target.query_port)),
        None => Ok((
            target.query_port,
            parse_port(target.require_extra("voice_port")?)?,
        )),
    }
}

/// Undo ServerQuery escaping.
pub(super) fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('p') => out.push('|'),
            Some('/') => out.push('/'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

pub(super) fn parse_entry(entry: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for pair in entry.split(' ') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => out.insert(key.to_owned(), unescape(value)),
            None => out.insert(pair.to_owned(), String::new()),
        };
    }
    out
}

pub(super) fn parse_list(line: &str) -> Vec<BTreeMap<String, String>> {
    line.split('|').map(parse_entry).collect()
}

fn is_error_ok(line: &str) -> bool {
    line.starts_with("error id=0")
}

/// Send one command and collect its payload line (if any).
async fn run_command<R>(
    reader: &mut BufReader<R>,
    timeout: Duration,
    command: &str,
) -> Result<String, ProbeError>
where
    R: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;

    tokio::time::timeout(timeout, reader.get_mut().write_all(command.as_bytes()))
        .await
        .map_err(|_| ProbeError::Timeout)?
        .map_err(|e| crate::error::io_error(&e))?;

    let payload = tcp::read_line(reader, timeout).await?;
    if is_error_ok(&payload) {
        // Commands without output answer with the status line only.
        return Ok(String::new());
    }
    let status = tcp::read_line(reader, timeout).await?;
    if !is_error_ok(&status) {
        return Err(ProbeError::transport(format!("serverquery: {status}")));
    }
    Ok(payload)
}

#[async_trait]
impl Strategy for Teamspeak3 {
    fn name(&self) -> &'static str {
        "teamspeak3"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let (query_port, voice_port) = select_ports(target)?;

        let stream = tcp::connect(&target.address, query_port, self.timeout).await?;
        let mut reader = BufReader::new(stream);
        let pinger = Pinger::start();

        // Banner: "TS3" + a MOTD line.
        let banner = tcp::read_line(&mut reader, self.timeout).await?;
        if !banner.starts_with("TS3") {
            return Err(ProbeError::protocol("not a ts3 serverquery endpoint"));
        }
        tcp::read_line(&mut reader, self.timeout).await?;

        run_command(&mut reader, self.timeout, &format!("use port={voice_port}\n")).await?;
        let info_line = run_command(&mut reader, self.timeout, "serverinfo\n").await?;
        let clients_line = run_command(&mut reader, self.timeout, "clientlist\n").await?;
        let channels_line = run_command(&mut reader, self.timeout, "channellist\n").await?;
        let ping_ms = pinger.millis();

        let info = parse_entry(&info_line);
        let clients = parse_list(&clients_line);
        let channels = parse_list(&channels_line);

        let players: Vec<Player> = clients
            .iter()
            .filter(|c| c.get("client_type").map(String::as_str) == Some("0"))
            .map(|c| Player {
                name: c.get("client_nickname").cloned().unwrap_or_default(),
                raw: json!(c),
            })
            .collect();

        let get = |key: &str| info.get(key).map(String::as_str).unwrap_or_default();

        Ok(Probe {
            name: get("virtualserver_name").to_owned(),
            map: String::new(),
            password: get("virtualserver_flag_password") == "1",
            numplayers: players.len() as i64,
            numbots: 0,
            maxplayers: get("virtualserver_maxclients").parse().unwrap_or(0),
            players: Some(players),
            bots: None,
            connect: format!("{}:{voice_port}", target.address),
            ping_ms,
            raw: json!({ "info": info, "channels": channels }),
            ..Probe::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_is_undone() {
        assert_eq!(unescape("My\\sServer\\p2"), "My Server|2");
        assert_eq!(unescape("a\\\\b"), "a\\b");
    }

    #[test]
    fn client_entries_parse_and_filter() {
        let clients = parse_list(
            "clid=1 client_nickname=serveradmin\\sfrom\\s[::1] client_type=1|clid=2 client_nickname=Luna client_type=0",
        );
        assert_eq!(clients.len(), 2);
        let humans: Vec<_> = clients
            .iter()
            .filter(|c| c.get("client_type").map(String::as_str) == Some("0"))
            .collect();
        assert_eq!(humans.len(), 1);
        assert_eq!(humans[0].get("client_nickname").unwrap(), "Luna");
    }

    #[test]
    fn flag_without_value_parses_empty() {
        let entry = parse_entry("virtualserver_name=TS flag");
        assert_eq!(entry.get("flag").unwrap(), "");
    }

    #[test]
    fn legacy_rows_hold_the_voice_port_in_the_primary_field() {
        let target = ProbeTarget::new("teamspeak3", "ts.example.com", 9987)
            .with_extra("teamspeakQueryPort", "10011");
        assert_eq!(select_ports(&target).unwrap(), (10011, 9987));
    }

    #[test]
    fn newer_rows_hold_the_query_port_in_the_primary_field() {
        let target = ProbeTarget::new("teamspeak3", "ts.example.com", 10011)
            .with_extra("voice_port", "9987");
        assert_eq!(select_ports(&target).unwrap(), (10011, 9987));
    }

    #[test]
    fn rows_without_either_extra_are_invalid() {
        let target = ProbeTarget::new("teamspeak3", "ts.example.com", 10011);
        assert!(matches!(
            select_ports(&target),
            Err(ProbeError::InvalidInput(_))
        ));
    }
}

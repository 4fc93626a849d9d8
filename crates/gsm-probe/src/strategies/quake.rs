//! Shared core for the quake-lineage out-of-band UDP protocols.
//!
//! Requests and responses are prefixed with `\xFF\xFF\xFF\xFF`; the payload
//! is a response marker, an infostring (`\key\value...`), and one
//! whitespace-separated player row per line with quoted names.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ProbeError;
use crate::net::codec::parse_infostring;
use crate::net::udp::UdpClient;
use crate::net::Pinger;

const OOB_PREFIX: &[u8] = b"\xFF\xFF\xFF\xFF";

pub(super) struct QuakeResponse {
    pub info: BTreeMap<String, String>,
    pub player_rows: Vec<Vec<String>>,
    pub ping_ms: u64,
}

pub(super) async fn query_status(
    host: &str,
    port: u16,
    timeout: Duration,
    command: &[u8],
    response_marker: &[u8],
) -> Result<QuakeResponse, ProbeError> {
    let udp = UdpClient::connect(host, port, timeout).await?;
    let mut request = OOB_PREFIX.to_vec();
    request.extend_from_slice(command);

    let pinger = Pinger::start();
    let datagram = udp.request(&request).await?;
    let ping_ms = pinger.millis();

    let Some(payload) = datagram.strip_prefix(OOB_PREFIX) else {
        return Err(ProbeError::protocol("missing out-of-band prefix"));
    };
    let Some(payload) = payload.strip_prefix(response_marker) else {
        return Err(ProbeError::protocol(format!(
            "unexpected response marker, wanted {:?}",
            String::from_utf8_lossy(response_marker)
        )));
    };

    let text = String::from_utf8_lossy(payload);
    let mut lines = text.split('\n').filter(|l| !l.is_empty());
    let info = parse_infostring(lines.next().unwrap_or_default());
    let player_rows = lines.map(tokenize_player_row).collect();

    Ok(QuakeResponse {
        info,
        player_rows,
        ping_ms,
    })
}

/// Split a player row on whitespace, keeping quoted fields intact.
pub(super) fn tokenize_player_row(row: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in row.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Common infostring lookups with the historical key spellings.
pub(super) fn info_str<'a>(
    info: &'a BTreeMap<String, String>,
    keys: &[&str],
) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| info.get(*k))
        .map(String::as_str)
}

pub(super) fn info_int(info: &BTreeMap<String, String>, keys: &[&str]) -> i64 {
    info_str(info, keys)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_rows_keep_quoted_names_together() {
        let tokens = tokenize_player_row("5 120 \"Lone Wolf\" 0");
        assert_eq!(tokens, ["5", "120", "Lone Wolf", "0"]);
    }

    #[test]
    fn empty_quotes_are_dropped_like_whitespace() {
        let tokens = tokenize_player_row("0 0 \"\"");
        assert_eq!(tokens, ["0", "0"]);
    }

    #[test]
    fn info_lookups_try_alternate_spellings() {
        let mut info = BTreeMap::new();
        info.insert("sv_hostname".to_owned(), "Arena".to_owned());
        info.insert("maxclients".to_owned(), "8".to_owned());
        assert_eq!(info_str(&info, &["hostname", "sv_hostname"]), Some("Arena"));
        assert_eq!(info_int(&info, &["sv_maxclients", "maxclients"]), 8);
        assert_eq!(info_int(&info, &["missing"]), 0);
    }
}

//! Game catalog: the immutable table mapping a game id to its display name,
//! wire protocol, and default-port options.
//!
//! The catalog is parsed once at startup from the embedded `games.csv`
//! resource. The file is a plain delimited table (`Id,Name,Protocol,Options`)
//! with `#` comment lines and blank separator lines; options are
//! `;`-separated `k=v` pairs.

use std::collections::BTreeMap;

use thiserror::Error;

const GAMES_CSV: &str = include_str!("../games.csv");

/// Protocol family that anchors the `27015 + port_query_offset` fallback.
const VALVE_PROTOCOL: &str = "source";
const VALVE_DEFAULT_PORT: u32 = 27015;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown game id: {0}")]
    UnknownGame(String),
    #[error("games.csv line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// One row of the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEntry {
    pub id: String,
    pub fullname: String,
    pub protocol: String,
    pub options: BTreeMap<String, String>,
}

/// The parsed catalog. Immutable after load.
#[derive(Debug, Clone)]
pub struct GameCatalog {
    games: BTreeMap<String, GameEntry>,
}

impl GameCatalog {
    /// Parse the embedded `games.csv`.
    pub fn load() -> Result<Self, CatalogError> {
        Self::parse(GAMES_CSV)
    }

    /// Parse a catalog from raw csv text.
    pub fn parse(csv: &str) -> Result<Self, CatalogError> {
        let mut games = BTreeMap::new();
        let mut lines = csv.lines().enumerate();

        // Header row
        lines.next();

        for (idx, line) in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.splitn(4, ',');
            let id = fields.next().unwrap_or_default().trim();
            let fullname = fields.next().map(str::trim);
            let protocol = fields.next().map(str::trim);
            let options = fields.next().map(str::trim).unwrap_or_default();

            let (Some(fullname), Some(protocol)) = (fullname, protocol) else {
                return Err(CatalogError::Malformed {
                    line: idx + 1,
                    reason: "expected Id,Name,Protocol[,Options]".to_owned(),
                });
            };
            if id.is_empty() || protocol.is_empty() {
                return Err(CatalogError::Malformed {
                    line: idx + 1,
                    reason: "empty game id or protocol".to_owned(),
                });
            }

            let options = parse_options(options, idx + 1)?;
            games.insert(
                id.to_owned(),
                GameEntry {
                    id: id.to_owned(),
                    fullname: fullname.to_owned(),
                    protocol: protocol.to_owned(),
                    options,
                },
            );
        }

        Ok(GameCatalog { games })
    }

    /// Look up a game by id.
    pub fn find(&self, game_id: &str) -> Result<&GameEntry, CatalogError> {
        let game_id = resolve_alias(game_id);
        self.games
            .get(game_id)
            .ok_or_else(|| CatalogError::UnknownGame(game_id.to_owned()))
    }

    /// Iterate all entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &GameEntry> {
        self.games.values()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// Default query port for a game.
    ///
    /// Precedence: explicit `port_query`, else `port + port_query_offset`,
    /// else (source family) `27015 + port_query_offset`, else `port`.
    pub fn default_port(&self, game_id: &str) -> Result<Option<u16>, CatalogError> {
        let game = self.find(game_id)?;
        let opt = |key: &str| {
            game.options
                .get(key)
                .and_then(|v| v.parse::<i64>().ok())
        };

        let port = if let Some(query) = opt("port_query") {
            Some(query)
        } else if let Some(offset) = opt("port_query_offset") {
            if let Some(port) = opt("port") {
                Some(port + offset)
            } else if game.protocol == VALVE_PROTOCOL {
                Some(i64::from(VALVE_DEFAULT_PORT) + offset)
            } else {
                None
            }
        } else {
            opt("port")
        };

        Ok(port.and_then(|p| u16::try_from(p).ok()))
    }
}

/// `0` is permitted: directory-indexed protocols carry no reachable port.
pub fn is_port_valid(port: &str) -> bool {
    port.parse::<u32>().is_ok_and(|n| n <= 65535)
}

/// Legacy game-id spellings kept for rows created by old versions.
fn resolve_alias(game_id: &str) -> &str {
    match game_id {
        "forrest" => "forest",
        other => other,
    }
}

fn parse_options(raw: &str, line: usize) -> Result<BTreeMap<String, String>, CatalogError> {
    let mut options = BTreeMap::new();
    if raw.is_empty() {
        return Ok(options);
    }

    for item in raw.split(';') {
        let Some((key, value)) = item.split_once('=') else {
            return Err(CatalogError::Malformed {
                line,
                reason: format!("option `{item}` is not k=v"),
            });
        };
        options.insert(key.trim().to_owned(), value.trim().to_owned());
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_catalog_parses() {
        let catalog = GameCatalog::load().unwrap();
        assert!(catalog.len() > 50);
        assert_eq!(catalog.find("css").unwrap().protocol, "source");
    }

    #[test]
    fn explicit_query_port_wins() {
        let catalog = GameCatalog::load().unwrap();
        assert_eq!(catalog.default_port("mordhau").unwrap(), Some(27015));
        assert_eq!(catalog.default_port("terraria").unwrap(), Some(7878));
    }

    #[test]
    fn offset_applies_to_game_port() {
        let catalog = GameCatalog::load().unwrap();
        // arkse: 7777 + 19338
        assert_eq!(catalog.default_port("arkse").unwrap(), Some(27115));
        assert_eq!(catalog.default_port("valheim").unwrap(), Some(2457));
    }

    #[test]
    fn source_family_falls_back_to_27015_plus_offset() {
        let catalog = GameCatalog::parse(
            "Id,Name,Protocol,Options\nx,Example,source,port_query_offset=1\n",
        )
        .unwrap();
        assert_eq!(catalog.default_port("x").unwrap(), Some(27016));
    }

    #[test]
    fn bare_port_is_the_last_resort() {
        let catalog = GameCatalog::load().unwrap();
        assert_eq!(catalog.default_port("css").unwrap(), Some(27015));
        assert_eq!(catalog.default_port("minecraft").unwrap(), Some(25565));
    }

    #[test]
    fn directory_games_permit_port_zero() {
        let catalog = GameCatalog::load().unwrap();
        assert_eq!(catalog.default_port("discord").unwrap(), Some(0));
        assert!(is_port_valid("0"));
    }

    #[test]
    fn port_validation_bounds() {
        assert!(is_port_valid("65535"));
        assert!(!is_port_valid("65536"));
        assert!(!is_port_valid("-1"));
        assert!(!is_port_valid("query"));
    }

    #[test]
    fn legacy_forrest_alias_resolves() {
        let catalog = GameCatalog::load().unwrap();
        assert_eq!(catalog.find("forrest").unwrap().id, "forest");
    }

    #[test]
    fn unknown_game_is_an_error() {
        let catalog = GameCatalog::load().unwrap();
        assert!(matches!(
            catalog.find("no-such-game"),
            Err(CatalogError::UnknownGame(_))
        ));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let catalog = GameCatalog::parse(
            "Id,Name,Protocol,Options\n\n# comment\nx,Example,quake3,port=27960\n",
        )
        .unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn malformed_option_is_rejected() {
        let err = GameCatalog::parse("Id,Name,Protocol,Options\nx,Example,quake3,port\n")
            .unwrap_err();
        assert!(matches!(err, CatalogError::Malformed { line: 2, .. }));
    }
}

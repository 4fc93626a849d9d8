//! Color-code and rich-text stripping for server/map names.
//!
//! Several wire formats embed presentation markup in free-text fields; the
//! normalized probe carries plain text only.

/// Strip quake-style `^N` color codes (digit-only variant, used by the quake
/// family and fivem).
pub fn strip_quake_colors(s: &str) -> String {
    strip_caret(s, |c| c.is_ascii_digit())
}

/// Strip the wider BeamMP caret palette: hex digits plus `l`-`p` and `r`.
pub fn strip_beammp_codes(s: &str) -> String {
    strip_caret(s, |c| {
        c.is_ascii_hexdigit() || matches!(c, 'l'..='p' | 'r')
    })
}

fn strip_caret(s: &str, is_code: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '^' {
            if let Some(&next) = chars.peek() {
                if is_code(next) {
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Strip minecraft legacy `§x` formatting codes.
pub fn strip_section_codes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '§' {
            chars.next();
            continue;
        }
        out.push(c);
    }
    out
}

/// Strip factorio rich-text tags: `[tag=value]`, `[/tag]`, `[tag]`.
///
/// Unrecognized bracketed text (e.g. clan tags like `[EU]`) is kept only when
/// it does not look like a rich-text tag: tags are a bare identifier with an
/// optional `=value` part.
pub fn strip_rich_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(']') {
            Some(close) if is_rich_tag(&after[..close]) => {
                rest = &after[close + 1..];
            }
            Some(close) => {
                out.push_str(&rest[open..=open + close + 1]);
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_rich_tag(inner: &str) -> bool {
    let body = inner.strip_prefix('/').unwrap_or(inner);
    let name = body.split_once('=').map_or(body, |(name, _)| name);
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c == '-' || c == '_')
}

/// Prettify a BeamMP map path: `/levels/east_coast_usa/info.json` →
/// `East Coast Usa`.
pub fn prettify_map_path(map: &str) -> String {
    let name = map
        .trim_start_matches('/')
        .strip_prefix("levels/")
        .and_then(|m| m.strip_suffix("/info.json"))
        .unwrap_or(map);
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

//! Master server text protocol.
//!
//! Every message is one datagram holding a command word followed by
//! space-separated `KEY=VALUE` pairs. Keys are uppercase letters. Values
//! containing whitespace, `"` or `\` must be quoted with `"`, escaping
//! `"` and `\` as `\"` and `\\`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;
use crate::tags::{parse_tag_list, TagFilter};
use crate::types::ServerAddress;

/// Well-known port of the master server, and the default server port
pub const DEFAULT_PORT: u16 = 4950;

/// Largest LIST packet the master will send, in bytes. Kept below common
/// path MTU after IP/UDP headers.
pub const PACKET_BUDGET: usize = 1390;

/// Command words
pub const CMD_ANNOUNCE: &str = "ANNOUNCE";
pub const CMD_DESCRIBE: &str = "DESCRIBE";
pub const CMD_DESCRIPTION: &str = "DESCRIPTION";
pub const CMD_GET: &str = "GET";
pub const CMD_LIST: &str = "LIST";

/// Prefix accepted in front of inbound command words for older peers
pub const LEGACY_PREFIX: &str = "MS:";

/// Field keys
pub const FIELD_ADDRESS: &str = "IP";
pub const FIELD_DESCRIPTION: &str = "DE";
pub const FIELD_TAGS: &str = "TA";

/// Sent by the master to a freshly admitted server
pub const DESCRIBE_REQUEST: &str = "DESCRIBE DE,TA";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("expected upper-case key at offset {pos}, found {found:?}")]
    ExpectedKey { pos: usize, found: char },

    #[error("key {key:?} not followed by '=' at offset {pos}")]
    MissingEquals { key: String, pos: usize },

    #[error("missing closing quote for string opened at offset {pos}")]
    UnterminatedQuote { pos: usize },

    #[error("dangling escape at offset {pos}")]
    DanglingEscape { pos: usize },

    #[error("{found:?} not allowed in unquoted value at offset {pos}")]
    QuoteInToken { pos: usize, found: char },

    #[error("invalid address {0:?} in LIST")]
    BadAddress(String),
}

/// A decoded inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Announce,
    Describe(&'a str),
    Description(&'a str),
    Get(&'a str),
    List(&'a str),
}

impl<'a> Command<'a> {
    /// Split a message into its command word and tail. Returns `None` for
    /// unknown commands. The tail is not parsed here.
    pub fn parse(message: &'a str) -> Option<Self> {
        let message = message.trim_start();
        let message = message.strip_prefix(LEGACY_PREFIX).unwrap_or(message);
        let (word, tail) = match message.find(char::is_whitespace) {
            Some(i) => message.split_at(i),
            None => (message, ""),
        };

        match word {
            CMD_ANNOUNCE => Some(Self::Announce),
            CMD_DESCRIBE => Some(Self::Describe(tail)),
            CMD_DESCRIPTION => Some(Self::Description(tail)),
            CMD_GET => Some(Self::Get(tail)),
            CMD_LIST => Some(Self::List(tail)),
            _ => None,
        }
    }
}

/// Parsed `KEY=VALUE` pairs of a message tail, with typed accessors for
/// the fields the protocol knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    map: BTreeMap<String, String>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field. Returns false, and stores nothing, if `key` is not a
    /// valid key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if !is_key(&key) {
            return false;
        }
        self.map.insert(key, value.into());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// `DE`: free-text description
    pub fn description(&self) -> Option<&str> {
        self.get(FIELD_DESCRIPTION)
    }

    /// `TA` read as a server's tag list
    pub fn tags(&self) -> Option<BTreeSet<String>> {
        self.get(FIELD_TAGS).map(parse_tag_list)
    }

    /// `TA` read as a query filter; empty when absent
    pub fn tag_filter(&self) -> TagFilter {
        self.get(FIELD_TAGS).map(TagFilter::parse).unwrap_or_default()
    }

    /// `IP` read as the list of per-server fields a query asks for
    pub fn requested(&self) -> Vec<String> {
        self.get(FIELD_ADDRESS)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            f.write_str(&render_field(key, value))?;
        }
        Ok(())
    }
}

/// Escape `"` and `\` for use inside a quoted value.
pub fn quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted
}

/// Render one field, quoting the value only when it has to be.
pub fn render_field(key: &str, value: &str) -> String {
    let plain = !value.is_empty()
        && !value.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if plain {
        format!("{}={}", key, value)
    } else {
        format!("{}=\"{}\"", key, quote(value))
    }
}

fn is_key(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_uppercase())
}

/// Parse a message tail into its fields. Any syntax error rejects the
/// whole tail; a repeated key keeps its last value.
pub fn parse_fields(input: &str) -> Result<Fields, ParseError> {
    let mut fields = Fields::new();
    for (key, value) in parse_pairs(input)? {
        fields.map.insert(key, value);
    }
    Ok(fields)
}

type Cursor<'a> = Peekable<CharIndices<'a>>;

/// Parse a tail into its pairs, in wire order, keeping repeated keys.
fn parse_pairs(input: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut pairs = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if !c.is_ascii_uppercase() {
            return Err(ParseError::ExpectedKey { pos, found: c });
        }

        let mut key = String::new();
        while let Some((_, c)) = chars.next_if(|&(_, c)| c.is_ascii_uppercase()) {
            key.push(c);
        }

        match chars.next() {
            Some((_, '=')) => {}
            Some((pos, _)) => return Err(ParseError::MissingEquals { key, pos }),
            None => {
                return Err(ParseError::MissingEquals {
                    key,
                    pos: input.len(),
                })
            }
        }

        let value = match chars.next_if(|&(_, c)| c == '"') {
            Some((open, _)) => read_quoted(&mut chars, open)?,
            None => read_token(&mut chars)?,
        };
        pairs.push((key, value));
    }

    Ok(pairs)
}

fn read_quoted(chars: &mut Cursor<'_>, open: usize) -> Result<String, ParseError> {
    let mut value = String::new();
    loop {
        match chars.next() {
            None => return Err(ParseError::UnterminatedQuote { pos: open }),
            Some((_, '"')) => return Ok(value),
            Some((pos, '\\')) => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => return Err(ParseError::DanglingEscape { pos }),
            },
            Some((_, c)) => value.push(c),
        }
    }
}

fn read_token(chars: &mut Cursor<'_>) -> Result<String, ParseError> {
    let mut value = String::new();
    while let Some((pos, c)) = chars.next_if(|&(_, c)| !c.is_whitespace()) {
        if c == '"' || c == '\\' {
            return Err(ParseError::QuoteInToken { pos, found: c });
        }
        value.push(c);
    }
    Ok(value)
}

/// One server from a LIST reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedServer {
    pub address: ServerAddress,
    pub fields: Fields,
}

/// Decode the tail of a LIST packet. Each `IP=` starts a new server and
/// the fields after it belong to that server; fields before the first
/// `IP=` are ignored.
pub fn parse_list(tail: &str) -> Result<Vec<ListedServer>, ParseError> {
    let mut servers: Vec<ListedServer> = Vec::new();
    for (key, value) in parse_pairs(tail)? {
        if key == FIELD_ADDRESS {
            let address =
                ServerAddress::parse(&value).map_err(|_| ParseError::BadAddress(value.clone()))?;
            servers.push(ListedServer {
                address,
                fields: Fields::new(),
            });
        } else if let Some(server) = servers.last_mut() {
            server.fields.map.insert(key, value);
        }
    }
    Ok(servers)
}

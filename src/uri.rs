//! Minimal endpoint URI parser.
//!
//! Grammar: `transport://host:port?opt1=v1&opt2=v2&...` (§6). This is not the
//! "reliable transport" external collaborator — it is ordinary string
//! handling local to this crate, in the spirit of the teacher's own
//! `cli.rs::parse_duration` helper.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUri {
    pub transport: String,
    pub host: String,
    pub port: u16,
    options: BTreeMap<String, String>,
}

impl EndpointUri {
    pub fn parse(raw: &str) -> Option<Self> {
        let (transport, rest) = raw.split_once("://")?;
        let (authority, query) = match rest.split_once('?') {
            Some((a, q)) => (a, Some(q)),
            None => (rest, None),
        };

        let (host, port) = if let Some(stripped) = authority.strip_prefix(':') {
            ("".to_string(), stripped.parse().ok()?)
        } else if let Some((h, p)) = authority.rsplit_once(':') {
            (h.to_string(), p.parse().ok()?)
        } else {
            (authority.to_string(), 0)
        };

        let mut options = BTreeMap::new();
        if let Some(query) = query {
            for kv in query.split('&') {
                if kv.is_empty() {
                    continue;
                }
                match kv.split_once('=') {
                    Some((k, v)) => {
                        options.insert(k.to_string(), v.to_string());
                    }
                    None => {
                        options.insert(kv.to_string(), String::new());
                    }
                }
            }
        }

        Some(Self {
            transport: transport.to_string(),
            host,
            port,
            options,
        })
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|s| s.as_str())
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn set_option(&mut self, key: &str, value: impl Into<String>) {
        self.options.insert(key.to_string(), value.into());
    }

    pub fn has_option(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    /// Interprets `value` per §6's boolean-false set: `0|no|off|false`.
    pub fn option_bool(&self, key: &str, default: bool) -> bool {
        match self.option(key) {
            None => default,
            Some(v) => !matches!(v, "0" | "no" | "off" | "false"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transport_host_port_and_options() {
        let uri = EndpointUri::parse("srt://127.0.0.1:4200?mode=caller&blocking=0").unwrap();
        assert_eq!(uri.transport, "srt");
        assert_eq!(uri.host, "127.0.0.1");
        assert_eq!(uri.port, 4200);
        assert_eq!(uri.option("mode"), Some("caller"));
        assert!(!uri.option_bool("blocking", true));
    }

    #[test]
    fn empty_host_listener_form() {
        let uri = EndpointUri::parse("srt://:4200?mode=listener").unwrap();
        assert_eq!(uri.host, "");
        assert_eq!(uri.port, 4200);
        assert_eq!(uri.option("mode"), Some("listener"));
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(EndpointUri::parse("127.0.0.1:4200").is_none());
    }
}

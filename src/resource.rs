use url::Url;

pub const DEFAULT_API_URL: &str = "https://www.nationstates.net/cgi-bin/api.cgi";

/// A requested data point, optionally with its own parameters
/// (e.g. `census` with `scale=65`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub name: String,
    pub params: Vec<(String, String)>,
}

impl Shard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

impl From<&str> for Shard {
    fn from(name: &str) -> Self {
        Shard::new(name)
    }
}

/// What a request is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Nation(String),
    Region(String),
    World,
    /// World Assembly council (`1` General Assembly, `2` Security Council).
    WorldAssembly(String),
    /// Trading cards; `multi` selects the `cards` collection over a single `card`.
    Cards { multi: bool },
    Telegram {
        client: String,
        tgid: String,
        key: String,
        to: String,
    },
}

impl Resource {
    pub fn nation(name: impl Into<String>) -> Self {
        Resource::Nation(name.into())
    }

    fn default_shard(&self) -> Option<Shard> {
        match self {
            Resource::Cards { multi: true } => Some(Shard::new("cards")),
            Resource::Cards { multi: false } => Some(Shard::new("card")),
            _ => None,
        }
    }
}

/// Normalise a nation or region name the way the API keys them.
pub fn api_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Build the request URL for `resource` with the given shards.
pub fn build_url(base: &Url, resource: &Resource, shards: &[Shard], version: &str) -> Url {
    let all: Vec<Shard> = resource
        .default_shard()
        .into_iter()
        .chain(shards.iter().cloned())
        .collect();
    let mut pairs: Vec<(&str, String)> = Vec::new();
    match resource {
        Resource::Nation(name) => pairs.push(("nation", api_name(name))),
        Resource::Region(name) => pairs.push(("region", api_name(name))),
        Resource::WorldAssembly(council) => pairs.push(("wa", council.clone())),
        Resource::World | Resource::Cards { .. } => {}
        Resource::Telegram {
            client,
            tgid,
            key,
            to,
        } => pairs.extend([
            ("a", "sendTG".to_string()),
            ("client", client.clone()),
            ("tgid", tgid.clone()),
            ("key", key.clone()),
            ("to", api_name(to)),
        ]),
    }
    if !all.is_empty() {
        let names: Vec<&str> = all.iter().map(|s| s.name.as_str()).collect();
        pairs.push(("q", names.join(" ")));
    }
    for shard in &all {
        for (k, v) in &shard.params {
            pairs.push((k.as_str(), v.clone()));
        }
    }
    if !version.is_empty() {
        pairs.push(("v", version.to_string()));
    }

    let mut url = base.clone();
    // an untouched serializer would still leave a bare `?` behind
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    url
}

use serde::{Deserialize, Serialize};

/// Format version written with every persisted profile.
pub const CURRENT_DATA_TYPE_VERSION: u32 = 0;

/// The single persisted client record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    #[serde(rename = "dataTypeVersion")]
    pub schema_version: u32,
    #[serde(rename = "serverInformation", default)]
    pub server_info: Option<ServerInfo>,
    #[serde(rename = "userInformation", default)]
    pub user_info: Option<UserInfo>,
    #[serde(default)]
    pub stats: Stats,
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_DATA_TYPE_VERSION,
            server_info: None,
            user_info: None,
            stats: Stats::default(),
        }
    }
}

impl ClientProfile {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(rename = "publicKey", with = "public_key")]
    pub public_key: Vec<u8>,
    #[serde(rename = "pingCooldown")]
    pub ping_cooldown_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(rename = "id")]
    pub user_id: String,
    pub country: Country,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    #[serde(rename = "iso")]
    pub iso_code: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(rename = "sentPingsCount")]
    pub sent_pings_count: u64,
}

/// Bring a freshly loaded record up to [`CURRENT_DATA_TYPE_VERSION`].
///
/// Only version 0 exists so far; records carrying any other version are
/// kept as they are.
pub fn migrate(profile: ClientProfile) -> ClientProfile {
    match profile.schema_version {
        CURRENT_DATA_TYPE_VERSION => profile,
        other => {
            tracing::warn!(
                version = other,
                current = CURRENT_DATA_TYPE_VERSION,
                "No migration known for stored profile version, using it unchanged"
            );
            profile
        }
    }
}

/// The public key is written as an array of integers. Older records hold the
/// index-keyed object a serialized typed byte array turns into
/// (`{"0": 4, "1": 17, ...}`), which is accepted as well.
mod public_key {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum KeyRepr {
        Bytes(Vec<u8>),
        Indexed(BTreeMap<String, u8>),
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match KeyRepr::deserialize(deserializer)? {
            KeyRepr::Bytes(bytes) => Ok(bytes),
            KeyRepr::Indexed(map) => {
                let mut indexed = map
                    .into_iter()
                    .map(|(index, byte)| {
                        index
                            .parse::<usize>()
                            .map(|index| (index, byte))
                            .map_err(|_| D::Error::custom(format!("invalid key index {:?}", index)))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                indexed.sort_unstable_by_key(|(index, _)| *index);

                if indexed.iter().enumerate().any(|(pos, (index, _))| pos != *index) {
                    return Err(D::Error::custom("public key indices are not contiguous"));
                }
                Ok(indexed.into_iter().map(|(_, byte)| byte).collect())
            }
        }
    }
}

use url::Url;

/// Networks an ArkPunks deployment can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArkNetwork {
    Mutinynet,
    Mainnet,
    Regtest,
}

impl ArkNetwork {
    /// The bitcoin network the punk Taproot addresses are encoded for.
    /// Mutinynet is a signet variant.
    pub fn bitcoin_network(self) -> bitcoin::Network {
        match self {
            ArkNetwork::Mutinynet => bitcoin::Network::Signet,
            ArkNetwork::Mainnet => bitcoin::Network::Bitcoin,
            ArkNetwork::Regtest => bitcoin::Network::Regtest,
        }
    }
}

impl std::str::FromStr for ArkNetwork {
    type Err = ConnectionConfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mutinynet" => Ok(ArkNetwork::Mutinynet),
            "mainnet" => Ok(ArkNetwork::Mainnet),
            "regtest" => Ok(ArkNetwork::Regtest),
            other => Err(ConnectionConfError::InvalidNetwork(other.to_string())),
        }
    }
}

/// Ark connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConf {
    /// Ark server (wallet daemon) URL.
    pub ark_server_url: Url,
    /// Esplora endpoint used by the Ark layer for base-chain lookups.
    pub esplora_url: Option<Url>,
    /// Target network.
    pub network: ArkNetwork,
}

/// An error type when parsing a connection configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConnectionConfError {
    #[error("Missing `ark_server_url` for connection configuration")]
    MissingArkServerUrl,
    #[error("Invalid url `{0}`: {1}")]
    InvalidUrl(String, url::ParseError),
    #[error("Invalid network: {0}. Expected 'mutinynet', 'mainnet', or 'regtest'")]
    InvalidNetwork(String),
}

impl ConnectionConf {
    pub fn new(
        ark_server_url: &str,
        esplora_url: Option<&str>,
        network: ArkNetwork,
    ) -> Result<Self, ConnectionConfError> {
        let ark_server_url = ark_server_url
            .parse()
            .map_err(|e| ConnectionConfError::InvalidUrl(ark_server_url.to_string(), e))?;
        let esplora_url = match esplora_url {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|e| ConnectionConfError::InvalidUrl(raw.to_string(), e))?,
            ),
            None => None,
        };
        Ok(Self {
            ark_server_url,
            esplora_url,
            network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_networks() {
        assert_eq!("mutinynet".parse::<ArkNetwork>().unwrap(), ArkNetwork::Mutinynet);
        assert_eq!("Mainnet".parse::<ArkNetwork>().unwrap(), ArkNetwork::Mainnet);
        assert_eq!("regtest".parse::<ArkNetwork>().unwrap(), ArkNetwork::Regtest);
        assert!("testnet4".parse::<ArkNetwork>().is_err());
    }

    #[test]
    fn rejects_bad_url() {
        assert!(matches!(
            ConnectionConf::new("not a url", None, ArkNetwork::Regtest),
            Err(ConnectionConfError::InvalidUrl(..))
        ));
    }
}

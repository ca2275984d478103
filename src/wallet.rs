use {super::*, anyhow::Context};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub index: usize,
    pub bech32: String,
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub is_dev_fee: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub signature: String,
    pub public_key: String,
}

/// Key custody lives outside this crate. A wallet only lists addresses and
/// produces registration signatures.
pub trait Wallet: Send + Sync {
    fn addresses(&self) -> Vec<Address>;

    fn sign(&self, index: usize, message: &str) -> Result<Signature>;
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletEntry {
    #[serde(flatten)]
    pub address: Address,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Address list read from a JSON file. Signatures are produced by an external
/// signer and stored alongside each entry.
#[derive(Debug)]
pub struct FileWallet {
    entries: Vec<WalletEntry>,
}

impl FileWallet {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read wallet file `{}`", path.display()))?;

        let entries: Vec<WalletEntry> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse wallet file `{}`", path.display()))?;

        Self::new(entries)
    }

    pub fn new(mut entries: Vec<WalletEntry>) -> Result<Self> {
        entries.sort_by_key(|entry| entry.address.index);

        let mut seen = HashSet::new();
        for entry in &entries {
            ensure!(
                !entry.address.bech32.is_empty(),
                "wallet entry {} has an empty address",
                entry.address.index
            );
            ensure!(
                seen.insert(entry.address.index),
                "duplicate wallet index {}",
                entry.address.index
            );
        }

        Ok(Self { entries })
    }
}

impl Wallet for FileWallet {
    fn addresses(&self) -> Vec<Address> {
        self.entries
            .iter()
            .map(|entry| entry.address.clone())
            .collect()
    }

    fn sign(&self, index: usize, message: &str) -> Result<Signature> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.address.index == index)
            .ok_or_else(|| anyhow!("no wallet address with index {index}"))?;

        match (&entry.signature, &entry.public_key) {
            (Some(signature), Some(public_key)) => Ok(Signature {
                signature: signature.clone(),
                public_key: public_key.clone(),
            }),
            _ => bail!(
                "address {index} has no signature for `{}`",
                message.get(..40).unwrap_or(message)
            ),
        }
    }
}

use super::*;

/// ROM parameters sent with `POST /init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AshConfig {
    #[serde(rename = "nbLoops")]
    pub nb_loops: u32,
    #[serde(rename = "nbInstrs")]
    pub nb_instrs: u32,
    pub pre_size: u64,
    pub rom_size: u64,
    pub mixing_numbers: u32,
}

impl Default for AshConfig {
    fn default() -> Self {
        Self {
            nb_loops: 8,
            nb_instrs: 256,
            pre_size: 16 * 1024 * 1024,
            rom_size: 1024 * 1024 * 1024,
            mixing_numbers: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRequest {
    pub no_pre_mine: String,
    #[serde(rename = "ashConfig")]
    pub ash_config: AshConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResponse {
    #[serde(default)]
    pub worker_pid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRequest {
    pub preimage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashResponse {
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHashRequest {
    pub preimages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHashResponse {
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(rename = "romInitialized", default)]
    pub rom_initialized: bool,
}

impl HealthResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    pub fn is_ready(&self) -> bool {
        self.is_ok() && self.rom_initialized
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillWorkersResponse {
    #[serde(default)]
    pub message: Option<String>,
}

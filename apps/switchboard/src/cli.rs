use clap::Parser;

use switchboard_common::ProxyConfigPatch;

#[derive(Parser)]
#[command(name = "switchboard", about = "Multi-dialect AI proxy with pooled credentials")]
pub(crate) struct Cli {
    /// JSON config file; CLI flags and env vars override its values.
    #[arg(long, env = "SWITCHBOARD_CONFIG")]
    pub(crate) config: Option<String>,
    #[arg(long, env = "SWITCHBOARD_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "SWITCHBOARD_PORT")]
    pub(crate) port: Option<u16>,
    #[arg(long, env = "SWITCHBOARD_API_KEY")]
    pub(crate) api_key: Option<String>,
    #[arg(long, env = "SWITCHBOARD_REDIS_URL")]
    pub(crate) redis_url: Option<String>,
    #[arg(long, env = "SWITCHBOARD_DATA_DIR")]
    pub(crate) data_dir: Option<String>,
    /// Fail startup when the primary store is unreachable.
    #[arg(long, env = "SWITCHBOARD_STRICT_STORAGE")]
    pub(crate) strict_storage: bool,
    /// Outbound proxy for upstream egress.
    #[arg(long, env = "SWITCHBOARD_PROXY")]
    pub(crate) proxy: Option<String>,
}

impl Cli {
    pub(crate) fn as_patch(&self) -> ProxyConfigPatch {
        ProxyConfigPatch {
            host: self.host.clone(),
            port: self.port,
            api_key: self.api_key.clone(),
            redis_url: self.redis_url.clone(),
            data_dir: self.data_dir.clone(),
            storage_strict_mode: self.strict_storage.then_some(true),
            proxy: self.proxy.clone(),
            ..Default::default()
        }
    }
}

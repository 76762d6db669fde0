//! Command-line flags. Anything set here overrides the config file and environment.

use clap::Parser;
use pagi_autobrowse_core::AppConfig;

#[derive(Parser, Debug, Default)]
#[command(name = "autobrowse", version, about = "Voice and HTTP front end for browser automation")]
pub struct Cli {
    /// Automation API key (overrides NOVA_ACT_API_KEY and the saved key)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Persist --api-key to the credential store
    #[arg(long, requires = "api_key")]
    pub save_key: bool,

    /// Run the browser without a window
    #[arg(long)]
    pub headless: bool,

    /// Page opened when the browser starts
    #[arg(long)]
    pub starting_page: Option<String>,

    /// Enable the wake-phrase voice pipeline
    #[arg(long)]
    pub voice: bool,

    /// Input device name (substring match)
    #[arg(long)]
    pub device: Option<String>,

    /// List input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    #[arg(long)]
    pub port: Option<u16>,
}

impl Cli {
    pub fn apply(&self, config: &mut AppConfig) {
        if self.headless {
            config.headless = true;
        }
        if let Some(page) = &self.starting_page {
            config.starting_page = page.clone();
        }
        if self.voice {
            config.voice_enabled = true;
        }
        if let Some(device) = &self.device {
            config.input_device = Some(device.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }

    /// Non-blank `--api-key`.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }
}

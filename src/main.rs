//! VoiceBridge - realtime speech-to-speech translation client

use voicebridge::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use keel_auth::credentials::{CredentialProvider, IamCredentialProvider};
use keel_common::IngestConfig;
use keel_crypto::{KeyManager, LocalKms, MasterKey};
use keel_iam::{AclAuthorizer, IAMSys};
use keel_multipart::PartIngestor;
use keel_s3_api::AppState;
use keel_storage::{
    DataBackend, FsDataBackend, FsMetadataStore, MemoryDataBackend, MemoryMetadataStore,
    MetadataStore,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keel", about = "S3-compatible multipart ingestion server")]
struct Cli {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value = "9000")]
    port: u16,

    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Keep metadata, blobs and identities in memory only.
    #[arg(long, default_value_t = false)]
    memory: bool,

    #[arg(long, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::from_default_env().add_directive("keel=info".parse()?);
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let addr = format!("{}:{}", cli.host, cli.port);
    let (metadata, data, iam): (Arc<dyn MetadataStore>, Arc<dyn DataBackend>, Arc<IAMSys>) =
        if cli.memory {
            info!("running with in-memory stores");
            (
                Arc::new(MemoryMetadataStore::new()),
                Arc::new(MemoryDataBackend::new()),
                Arc::new(IAMSys::ephemeral()),
            )
        } else {
            let data_dir = PathBuf::from(&cli.data_dir);
            tokio::fs::create_dir_all(&data_dir).await?;
            (
                Arc::new(FsMetadataStore::new(&data_dir).await?),
                Arc::new(FsDataBackend::new(&data_dir).await?),
                Arc::new(IAMSys::new(&data_dir).await?),
            )
        };

    let access_key = std::env::var("KEEL_ROOT_USER").unwrap_or_else(|_| "keeladmin".to_string());
    let secret_key =
        std::env::var("KEEL_ROOT_PASSWORD").unwrap_or_else(|_| "keeladmin".to_string());
    let root = iam.ensure_account(&access_key, &secret_key, "root").await?;
    info!(access_key = %root.access_key, canonical_id = %root.canonical_id, "root account ready");

    let master_key = match std::env::var("KEEL_MASTER_KEY") {
        Ok(hex_key) => MasterKey::from_hex(hex_key.trim())?,
        Err(_) => {
            warn!("KEEL_MASTER_KEY not set, encrypted parts will not survive a restart");
            MasterKey::generate()
        }
    };
    let kms: Arc<dyn KeyManager> = Arc::new(LocalKms::new(master_key)?);

    let credential_provider: Arc<dyn CredentialProvider> =
        Arc::new(IamCredentialProvider::new(Arc::clone(&iam)));
    let ingestor = PartIngestor::new(
        Arc::clone(&metadata),
        data,
        Arc::clone(&kms),
        Arc::new(AclAuthorizer::new(Arc::clone(&iam))),
        IngestConfig::default(),
    );
    let state = AppState {
        ingestor,
        metadata,
        kms,
        iam,
    };
    let app = keel_s3_api::s3_router(state, credential_provider);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("keel server listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

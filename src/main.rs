use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::unbounded_channel;

use lingsip::ai::asr::HttpAsr;
use lingsip::ai::llm::OpenAiLlm;
use lingsip::ai::tts::HttpTts;
use lingsip::config::{Cli, Config};
use lingsip::engine::{EngineEvent, PhoneEngine};
use lingsip::rtp::endpoint::RtpEndpoint;
use lingsip::script::ScriptManager;
use lingsip::sip::{SipConfig, SipCore, SipEvent};
use lingsip::store::{open_store, PostgresStore};
use lingsip::transport::{spawn_sip_reader, SipInput, SipTx};
use lingsip::{logging, seed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::resolve(cli)?;
    logging::init(&cfg.logging);

    if cfg.mode != "server" {
        bail!("unsupported mode {:?}", cfg.mode);
    }

    if cfg.init_sql {
        if cfg.db_driver != "postgres" {
            bail!("--init-sql requires --db-driver postgres");
        }
        let dsn = cfg.dsn.as_deref().context("--init-sql requires --dsn")?;
        let store = PostgresStore::connect(dsn)
            .await
            .context("connecting for schema init")?;
        store
            .init_schema()
            .await
            .map_err(|e| anyhow::anyhow!("schema init failed: {e}"))?;
        info!("[main] relational schema created");
    }

    let store = open_store(&cfg.db_driver, cfg.dsn.as_deref(), &cfg.storage_root).await;

    if cfg.init {
        seed::seed(store.as_ref()).await.context("seeding demo data")?;
    }

    let scripts = Arc::new(ScriptManager::new());
    scripts
        .refresh(store.as_ref())
        .await
        .context("loading scripts from store")?;
    if let Some(dir) = cfg.script_dir.as_ref() {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("reading script dir {}", dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Err(e) = scripts.load_file(&path) {
                    warn!("[main] skipping script {}: {e}", path.display());
                }
            }
        }
    }
    info!("[main] {} scripts loaded", scripts.script_count());

    // --- media plane: one socket, one demultiplexer ---
    let endpoint = Arc::new(
        RtpEndpoint::bind("0.0.0.0", cfg.rtp_port)
            .await
            .context("binding RTP socket")?,
    );
    let _demux = endpoint.spawn_demux();
    info!("[main] RTP on 0.0.0.0:{}", endpoint.local_port());

    // --- signaling plane ---
    let sip_socket = Arc::new(
        UdpSocket::bind((cfg.sip_bind_ip.as_str(), cfg.sip_port))
            .await
            .context("binding SIP socket")?,
    );
    info!("[main] SIP UDP on {}", sip_socket.local_addr()?);
    let (sip_tx_ch, mut sip_rx) = unbounded_channel::<SipInput>();
    let _reader = spawn_sip_reader(sip_socket.clone(), sip_tx_ch);

    // --- adapters ---
    let tts = Arc::new(HttpTts::new(cfg.tts_endpoint.clone()).map_err(|e| anyhow::anyhow!("{e}"))?);
    let asr = Arc::new(HttpAsr::new(cfg.asr_endpoint.clone()).map_err(|e| anyhow::anyhow!("{e}"))?);
    let llm = Arc::new(
        OpenAiLlm::new(
            cfg.llm_endpoint.clone(),
            cfg.llm_api_key.clone(),
            cfg.llm_model.clone(),
            cfg.llm_refer_target.clone(),
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?,
    );

    let (engine_tx, mut engine_rx) = unbounded_channel::<EngineEvent>();
    let engine = PhoneEngine::new(
        store.clone(),
        scripts.clone(),
        endpoint.clone(),
        tts,
        asr,
        llm,
        engine_tx,
        cfg.storage_root.clone(),
    );

    let sip_core = SipCore::new(
        SipConfig {
            advertised_ip: cfg.advertised_ip.clone(),
            sip_port: cfg.sip_port,
            rtp_port: endpoint.local_port(),
            max_concurrent_sessions: cfg.max_concurrent_sessions,
        },
        store.clone(),
        SipTx::new(sip_socket),
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(err) = res {
                    warn!("[main] shutdown signal error: {err}");
                }
                info!("[main] shutting down");
                break;
            }
            Some(input) = sip_rx.recv() => {
                for event in sip_core.handle_input(&input).await {
                    match event {
                        SipEvent::Answered { call_id, peer_rtp, caller, callee } => {
                            engine.clone().start_call(call_id, peer_rtp, caller, callee).await;
                        }
                        SipEvent::Cancelled { call_id } => {
                            engine.handle_cancel(&call_id).await;
                        }
                        SipEvent::Bye { call_id } => {
                            engine.handle_bye(&call_id).await;
                        }
                    }
                }
            }
            Some(event) = engine_rx.recv() => {
                match event {
                    EngineEvent::SendBye { call_id } => {
                        sip_core.send_bye(&call_id).await;
                        sip_core.forget_dialog(&call_id);
                    }
                }
            }
            else => break,
        }
    }

    Ok(())
}

//! Application service that owns the poller and post-processor and runs
//! contextualization flows on behalf of a UI or CLI.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, info};

use discovery_client::{DiscoveryConfig, PlatformClient};
use discovery_core::{
    defaults, ArtifactFetcher, Asset, AssetStore, DerivedArtifact, Error, EventBus, EventEnvelope,
    ExtractedEntity, FileStore, JobClient, JobRequest, PnidOptions, ProgressReport,
    RelationshipStore, Result, SourceFile,
};

use crate::flow::{Callbacks, FlowContext, FlowHandle, FlowRunner, JobState};
use crate::poller::{JobPoller, PollPolicy};
use crate::postprocess::ArtifactPostProcessor;

pub const LOADING_ASSETS: &str = "Loading Assets";
pub const PROCESSING_FILE: &str = "Processing File";
pub const CONVERTING_FILE: &str = "Converting File";
pub const UPLOADING_RESULT: &str = "Uploading Result";
pub const EXTRACTING_ENTITIES: &str = "Extracting Entities";

/// Runs contextualization flows and publishes their events.
///
/// Callers emit intents (`start_pnid_conversion`, `start_entity_extraction`)
/// and observe results either through per-flow [`Callbacks`] or by
/// subscribing to the service's [`EventBus`].
#[derive(Clone)]
pub struct ContextualizationService {
    poller: JobPoller,
    post: ArtifactPostProcessor,
    assets: Arc<dyn AssetStore>,
    events: EventBus,
    pnid_options: PnidOptions,
    asset_page_size: u32,
}

impl ContextualizationService {
    pub fn new(
        jobs: Arc<dyn JobClient>,
        files: Arc<dyn FileStore>,
        relationships: Arc<dyn RelationshipStore>,
        assets: Arc<dyn AssetStore>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        Self {
            poller: JobPoller::new(jobs, PollPolicy::default()),
            post: ArtifactPostProcessor::new(files, relationships, fetcher),
            assets,
            events: EventBus::default(),
            pnid_options: PnidOptions::default(),
            asset_page_size: defaults::ASSET_PAGE_LIMIT,
        }
    }

    /// Wire every collaborator to one platform client, with poll and link
    /// settings taken from `config`.
    pub fn from_client(client: PlatformClient, config: &DiscoveryConfig) -> Self {
        let client = Arc::new(client);
        Self::new(
            client.clone(),
            client.clone(),
            client.clone(),
            client.clone(),
            client,
        )
        .with_poll_policy(PollPolicy::from(&config.poll))
        .with_post_processor_config(config)
    }

    fn with_post_processor_config(mut self, config: &DiscoveryConfig) -> Self {
        self.post = self.post.with_config(&config.post_processing);
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poller = JobPoller::new(self.poller.client(), policy);
        self
    }

    pub fn with_link_retry(mut self, attempts: u32, delay: std::time::Duration) -> Self {
        self.post = self.post.with_link_retry(attempts, delay);
        self
    }

    pub fn with_pnid_options(mut self, options: PnidOptions) -> Self {
        self.pnid_options = options;
        self
    }

    pub fn with_asset_page_size(mut self, size: u32) -> Self {
        self.asset_page_size = size.max(1);
        self
    }

    /// Publish on an existing bus instead of the service's own.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    /// Convert a P&ID document into an SVG linked to its source file and to
    /// the assets detected in it.
    ///
    /// Phases: "Loading Assets (n%)", "Processing File" (parse job),
    /// "Converting File" (convert job fed with the parse annotations), and
    /// "Uploading Result". The result callback receives the
    /// [`DerivedArtifact`].
    pub fn start_pnid_conversion(
        &self,
        source: SourceFile,
        callbacks: Callbacks<DerivedArtifact>,
    ) -> FlowHandle {
        let runner = FlowRunner::new("pnid_conversion", source.id, self.events.clone(), callbacks);
        let ctx = runner.context();
        let service = self.clone();
        runner.spawn(async move { service.pnid_conversion(ctx, source).await })
    }

    /// Find mentions of known assets in a file.
    ///
    /// Phases: "Loading Assets (n%)" then "Extracting Entities". The result
    /// callback receives the extracted entities.
    pub fn start_entity_extraction(
        &self,
        file_id: i64,
        callbacks: Callbacks<Vec<ExtractedEntity>>,
    ) -> FlowHandle {
        let runner = FlowRunner::new("entity_extraction", file_id, self.events.clone(), callbacks);
        let ctx = runner.context();
        let service = self.clone();
        runner.spawn(async move { service.entity_extraction(ctx, file_id).await })
    }

    async fn pnid_conversion(&self, ctx: FlowContext, source: SourceFile) -> Result<DerivedArtifact> {
        let assets = self.load_assets(&ctx).await?;

        ctx.report_progress(ProgressReport::phase(PROCESSING_FILE));
        let parsed = ctx
            .run_job(
                &self.poller,
                JobRequest::pnid_parse(source.id, &assets, &self.pnid_options),
            )
            .await?;
        let detected = ExtractedEntity::from_snapshot(&parsed);
        let asset_ids: Vec<i64> = detected.iter().filter_map(|e| e.asset_id).collect();
        debug!(
            flow_id = %ctx.flow_id(),
            entities = detected.len(),
            assets = asset_ids.len(),
            "P&ID parsed"
        );

        ctx.report_progress(ProgressReport::phase(CONVERTING_FILE));
        let annotations = JsonValue::Array(parsed.items().to_vec());
        let converted = ctx
            .run_job(
                &self.poller,
                JobRequest::pnid_convert(source.id, annotations, &self.pnid_options),
            )
            .await?;
        let svg_url = converted.svg_url().ok_or_else(|| {
            Error::PostProcessing(format!(
                "Convert job {} completed without an svgUrl",
                converted.job_id
            ))
        })?;

        ctx.advance(JobState::PostProcessing);
        ctx.report_progress(ProgressReport::phase(UPLOADING_RESULT));
        let artifact = self.post.process(svg_url, &source, &asset_ids).await?;
        info!(
            flow_id = %ctx.flow_id(),
            file_id = artifact.file.id,
            asset_links = artifact.asset_links.len(),
            "Derived P&ID stored"
        );
        Ok(artifact)
    }

    async fn entity_extraction(&self, ctx: FlowContext, file_id: i64) -> Result<Vec<ExtractedEntity>> {
        let assets = self.load_assets(&ctx).await?;

        ctx.report_progress(ProgressReport::phase(EXTRACTING_ENTITIES));
        let snapshot = ctx
            .run_job(&self.poller, JobRequest::entity_extraction(&[file_id], &assets))
            .await?;
        Ok(ExtractedEntity::from_snapshot(&snapshot))
    }

    /// Page through every asset, reporting "Loading Assets (n%)" after each
    /// page.
    async fn load_assets(&self, ctx: &FlowContext) -> Result<Vec<Asset>> {
        let total = self.assets.count().await?;
        ctx.report_progress(ProgressReport::fraction(LOADING_ASSETS, 0, total));

        let mut assets = Vec::with_capacity(total.min(100_000) as usize);
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .assets
                .list_page(cursor.as_deref(), self.asset_page_size)
                .await?;
            assets.extend(page.items);
            ctx.report_progress(ProgressReport::fraction(
                LOADING_ASSETS,
                assets.len() as u64,
                total,
            ));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(flow_id = %ctx.flow_id(), count = assets.len(), "Assets loaded");
        Ok(assets)
    }
}

//! DCE capture: resolve the package URL, download and unpack the archive,
//! upload every file, classify filenames, then atomically swap the
//! opportunity's file set and advance its lifecycle.
//!
//! Each step fails with its own `CaptureError` variant so an aborted capture
//! is diagnosable from the error alone. A capture failure only concerns its
//! opportunity; batch callers log and move on.

use std::sync::Arc;

use sniper_adapters::archive::{self, ArchiveEntry, ArchiveError};
use sniper_adapters::notify::admin_dce_request_alert;
use sniper_adapters::{ClassifiedFile, ScrapeError};
use sniper_core::{DceFile, FileCategory, Opportunity, OpportunityStatus};
use sniper_storage::{FetchError, StoreError};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::Pipeline;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("opportunity {0} not found")]
    OpportunityNotFound(Uuid),
    #[error("tender {0} not found")]
    TenderNotFound(Uuid),
    #[error("no source url available for the tender")]
    NoSourceUrl,
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error("buyer profile resolved to a landing page, not an archive: {page_url}")]
    LandingPageOnly { page_url: String },
    #[error("archive download failed: {0}")]
    Download(#[from] FetchError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("uploading {filename} failed: {source}")]
    Upload {
        filename: String,
        source: anyhow::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub opportunity_id: Uuid,
    pub file_count: usize,
    pub dce_url: Option<String>,
}

impl Pipeline {
    /// Full capture flow for one opportunity: scrape, download, unpack,
    /// upload, classify, persist, close the ticket, notify.
    pub async fn capture_dce(&self, opportunity_id: Uuid) -> Result<CaptureReport, CaptureError> {
        let opportunity = self
            .opportunities
            .get(opportunity_id)
            .await?
            .ok_or(CaptureError::OpportunityNotFound(opportunity_id))?;
        let tender = self
            .tenders
            .get(opportunity.tender_id)
            .await?
            .ok_or(CaptureError::TenderNotFound(opportunity.tender_id))?;

        let dce_url = match &opportunity.dce_url {
            Some(url) => url.clone(),
            None => {
                let page_url = tender.source_url.as_deref().ok_or(CaptureError::NoSourceUrl)?;
                let link = self.resolver.resolve(page_url).await?;
                if !link.direct {
                    return Err(CaptureError::LandingPageOnly { page_url: link.url });
                }
                self.opportunities
                    .set_dce_url(opportunity_id, &link.url)
                    .await?;
                link.url
            }
        };

        info!(opportunity = %opportunity_id, url = %dce_url, "downloading consultation archive");
        let response = self.fetcher.get_bytes(&dce_url).await?;
        let file_count = self.ingest_archive(&opportunity, &response.body).await?;

        Ok(CaptureReport {
            opportunity_id,
            file_count,
            dce_url: Some(dce_url),
        })
    }

    /// Admin manual path: the operator downloaded the archive themselves and
    /// hands us the bytes.
    pub async fn process_manual_archive(
        &self,
        opportunity_id: Uuid,
        bytes: &[u8],
    ) -> Result<CaptureReport, CaptureError> {
        let opportunity = self
            .opportunities
            .get(opportunity_id)
            .await?
            .ok_or(CaptureError::OpportunityNotFound(opportunity_id))?;
        let file_count = self.ingest_archive(&opportunity, bytes).await?;
        Ok(CaptureReport {
            opportunity_id,
            file_count,
            dce_url: opportunity.dce_url,
        })
    }

    /// Unpack -> upload -> classify -> persist -> advance -> notify.
    async fn ingest_archive(
        &self,
        opportunity: &Opportunity,
        bytes: &[u8],
    ) -> Result<usize, CaptureError> {
        let entries = archive::unpack(bytes)?;
        let uploaded = self.upload_entries(entries).await?;

        let filenames: Vec<String> = uploaded.iter().map(|(name, _)| name.clone()).collect();
        // Classification degrades rather than aborting a capture that already
        // holds uploaded documents: unclassified files land in OTHER.
        let classified = match self.screening.classify_files(&filenames).await {
            Ok(classified) => classified,
            Err(err) => {
                warn!(opportunity = %opportunity.id, error = %err, "file classification failed, defaulting to OTHER");
                Vec::new()
            }
        };
        let files = merge_classified_files(&uploaded, &classified);

        self.opportunities
            .replace_files(opportunity.id, &files)
            .await?;
        self.finish_capture(opportunity).await?;
        info!(opportunity = %opportunity.id, files = files.len(), "capture persisted");
        Ok(files.len())
    }

    /// One upload task per archive entry, capped by the configured
    /// concurrency. Results come back in entry order.
    async fn upload_entries(
        &self,
        entries: Vec<ArchiveEntry>,
    ) -> Result<Vec<(String, String)>, CaptureError> {
        let semaphore = Arc::new(Semaphore::new(self.config.upload_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let documents = Arc::clone(&self.documents);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let result = documents.upload(&entry.bytes, &entry.name).await;
                (index, entry.name, result)
            });
        }

        let mut uploaded = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, name, result) = joined.expect("upload task never panics");
            match result {
                Ok(url) => uploaded.push((index, name, url)),
                Err(source) => {
                    tasks.abort_all();
                    return Err(CaptureError::Upload {
                        filename: name,
                        source,
                    });
                }
            }
        }
        uploaded.sort_by_key(|(index, _, _)| *index);
        Ok(uploaded
            .into_iter()
            .map(|(_, name, url)| (name, url))
            .collect())
    }

    /// Close the fulfillment ticket and advance the lifecycle from wherever
    /// the capture left it. Re-runs on a terminal opportunity only swap
    /// files; there is no edge left to take.
    async fn finish_capture(&self, opportunity: &Opportunity) -> Result<(), CaptureError> {
        let closed = self.fulfillments.close_pending(opportunity.id).await?;
        if closed > 0 {
            info!(opportunity = %opportunity.id, tickets = closed, "fulfillment tickets closed");
        }

        let current = self
            .opportunities
            .get(opportunity.id)
            .await?
            .ok_or(CaptureError::OpportunityNotFound(opportunity.id))?;
        match current.status {
            OpportunityStatus::Extracted => {
                self.opportunities
                    .transition(opportunity.id, OpportunityStatus::Extracted, OpportunityStatus::Ready)
                    .await?;
            }
            OpportunityStatus::ApprovedByClient => {
                self.opportunities
                    .transition(
                        opportunity.id,
                        OpportunityStatus::ApprovedByClient,
                        OpportunityStatus::DceReady,
                    )
                    .await?;
            }
            _ => {}
        }

        if let Ok(Some(client)) = self.clients.get(opportunity.client_id).await {
            if let Some(email) = client.email.as_deref() {
                if let Ok(Some(tender)) = self.tenders.get(opportunity.tender_id).await {
                    let files = self.opportunities.files(opportunity.id).await?;
                    if let Err(err) = self
                        .notifier
                        .send_dce_ready(email, &tender.title, files.len())
                        .await
                    {
                        warn!(opportunity = %opportunity.id, error = %err, "dce-ready alert failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Admin alert used when a client requests a package; fire-and-forget.
    pub async fn alert_admin_dce_requested(&self, client_name: &str, opportunity: &Opportunity) {
        let alert = admin_dce_request_alert(client_name, opportunity);
        if let Err(err) = self.notifier.send_admin_alert(&alert).await {
            warn!(opportunity = %opportunity.id, error = %err, "admin dce-request alert failed");
        }
    }
}

/// Join upload URLs with AI classifications by filename. Uploads are the
/// source of truth: every uploaded file appears exactly once, and files the
/// classifier missed (or invented) default to OTHER / non-priority.
pub fn merge_classified_files(
    uploaded: &[(String, String)],
    classified: &[ClassifiedFile],
) -> Vec<DceFile> {
    uploaded
        .iter()
        .map(|(name, url)| {
            let classification = classified.iter().find(|c| &c.name == name);
            DceFile {
                filename: name.clone(),
                url: url.clone(),
                category: classification.map(|c| c.category).unwrap_or(FileCategory::Other),
                is_priority: classification.map(|c| c.is_priority).unwrap_or(false),
            }
        })
        .collect()
}

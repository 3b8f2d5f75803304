//! Session opening: exact size, names, and both remote sessions.

use chrono::{DateTime, Utc};
use meetrec_protocol::{
    FragmentRange, PrimaryProgress, SecondaryProgress, SessionPhase, UploadSession,
};
use meetrec_remote::{PrimaryStart, PrimaryTarget, SecondaryStart, SecondaryTarget};
use meetrec_transfer::SizeEstimator;
use tracing::debug;

use crate::error::PipelineError;
use crate::logbook::InvocationLog;
use crate::naming::{display_name, sanitize_title, secondary_file_name};
use crate::store::FragmentStore;

/// What the caller declares about a new recording.
#[derive(Debug, Clone)]
pub struct SessionRequest<'r> {
    pub session_id: &'r str,
    pub mime_type: &'r str,
    pub title: Option<&'r str>,
    pub now: DateTime<Utc>,
    /// The lot that opens the session, checked against the listing before
    /// either target is contacted.
    pub range: FragmentRange,
    pub is_final_lot: bool,
}

/// Checks that a lot continues exactly at `cursor` and stays within the
/// `count` fragments of the recording.
pub fn check_lot(
    range: FragmentRange,
    is_final_lot: bool,
    cursor: u32,
    count: u32,
) -> Result<(), PipelineError> {
    if range.start != cursor {
        return Err(PipelineError::InvalidRequest(format!(
            "lot starts at fragment {}, session continues at {cursor}",
            range.start
        )));
    }
    if range.end < range.start || range.end > count {
        return Err(PipelineError::InvalidRequest(format!(
            "lot {}..{} outside the {count} fragments of the recording",
            range.start, range.end
        )));
    }
    if is_final_lot && range.end != count {
        return Err(PipelineError::InvalidRequest(format!(
            "final lot ends at {}, recording has {count} fragments",
            range.end
        )));
    }
    Ok(())
}

/// Opens resumable sessions against both targets.
pub struct SessionInitiator<'a> {
    primary: &'a dyn PrimaryTarget,
    secondary: Option<&'a dyn SecondaryTarget>,
    secondary_parent_id: Option<&'a str>,
}

impl<'a> SessionInitiator<'a> {
    pub fn new(
        primary: &'a dyn PrimaryTarget,
        secondary: Option<&'a dyn SecondaryTarget>,
        secondary_parent_id: Option<&'a str>,
    ) -> Self {
        Self {
            primary,
            secondary,
            secondary_parent_id,
        }
    }

    /// Sizes the recording and opens both targets.
    ///
    /// A primary failure is fatal. A secondary failure only disables the
    /// secondary for this session.
    pub async fn open(
        &self,
        fragments: &dyn FragmentStore,
        request: &SessionRequest<'_>,
        log: &mut InvocationLog,
    ) -> Result<UploadSession, PipelineError> {
        let session_id = request.session_id;

        let listing = fragments.list(session_id).await?;
        let estimator = SizeEstimator::new(listing)?;
        check_lot(
            request.range,
            request.is_final_lot,
            0,
            estimator.fragment_count(),
        )?;
        let last_index = estimator.last_index();
        let last = fragments
            .get(session_id, last_index)
            .await?
            .ok_or_else(|| PipelineError::MissingFragment {
                session: session_id.to_string(),
                index: last_index,
            })?;
        let total_bytes = estimator.total_bytes(&last)?;
        log.success(format!(
            "{} fragments, {total_bytes} bytes total",
            estimator.fragment_count()
        ));
        debug!(
            session = %session_id,
            naive = estimator.naive_total(),
            exact = total_bytes,
            "sized recording"
        );

        let title = sanitize_title(request.title.unwrap_or_default());
        let start = PrimaryStart {
            content_length: total_bytes,
            mime_type: request.mime_type.to_string(),
            display_name: display_name(&title, request.now),
        };
        let upload_url = self
            .primary
            .start(&start)
            .await
            .map_err(PipelineError::Primary)?;
        log.info(format!("primary session opened as {}", start.display_name));

        let secondary = self
            .open_secondary(&title, request.mime_type, total_bytes, log)
            .await;

        let mut session = UploadSession {
            id: session_id.to_string(),
            mime_type: request.mime_type.to_string(),
            display_name: start.display_name,
            total_bytes,
            fragment_count: estimator.fragment_count(),
            primary: PrimaryProgress::new(upload_url),
            secondary,
            fragment_cursor: 0,
            buffer_residual: Vec::new(),
            residual_checksum: String::new(),
            phase: SessionPhase::Init,
            remote_file: None,
            created_at: request.now,
            updated_at: request.now,
        };
        session.advance(SessionPhase::SessionOpen)?;
        Ok(session)
    }

    async fn open_secondary(
        &self,
        title: &str,
        mime_type: &str,
        size: u64,
        log: &mut InvocationLog,
    ) -> SecondaryProgress {
        let (Some(target), Some(parent_id)) = (self.secondary, self.secondary_parent_id) else {
            return SecondaryProgress::disabled("secondary target not configured");
        };

        let start = SecondaryStart {
            name: secondary_file_name(title, mime_type),
            parent_id: parent_id.to_string(),
            mime_type: mime_type.to_string(),
            size,
        };
        match target.start(&start).await {
            Ok(location) => {
                log.info(format!("secondary session opened for {}", start.name));
                SecondaryProgress::new(location)
            }
            Err(e) => {
                let reason = PipelineError::Secondary(e).to_string();
                log.warn(format!("secondary disabled: {reason}"));
                SecondaryProgress::disabled(reason)
            }
        }
    }
}

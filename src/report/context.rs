use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

/// Read-only view of the current user/session/course identity, backed by
/// the host's credential and session storage. Each getter is a single
/// fallible read with no side effect.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn user_id(&self) -> Result<String>;
    /// `None` while no session is active.
    async fn session_id(&self) -> Result<Option<String>>;
    async fn course_id(&self) -> Result<String>;
}

/// Fixed-identity directory for demos and hosts without a credential store.
pub struct StaticSessionDirectory {
    pub user_id: String,
    pub session_id: Option<String>,
    pub course_id: String,
}

#[async_trait]
impl SessionDirectory for StaticSessionDirectory {
    async fn user_id(&self) -> Result<String> {
        Ok(self.user_id.clone())
    }

    async fn session_id(&self) -> Result<Option<String>> {
        Ok(self.session_id.clone())
    }

    async fn course_id(&self) -> Result<String> {
        Ok(self.course_id.clone())
    }
}

/// Everything a report record needs besides its payload.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub user_id: String,
    pub session_id: String,
    pub course_id: String,
    pub captured_at_ms: i64,
}

/// Resolves the identity context for one report emission.
///
/// Returns `Ok(None)` when no session is active: telemetry outside an
/// active session is deliberately discarded, not queued.
pub async fn resolve_report_context(
    directory: &dyn SessionDirectory,
) -> Result<Option<ReportContext>> {
    let Some(session_id) = directory.session_id().await? else {
        return Ok(None);
    };
    Ok(Some(ReportContext {
        user_id: directory.user_id().await?,
        session_id,
        course_id: directory.course_id().await?,
        captured_at_ms: Utc::now().timestamp_millis(),
    }))
}

/// Human-readable descriptor of the device this pipeline runs on,
/// stamped into every report record.
pub fn device_descriptor() -> String {
    let os = sysinfo::System::name().unwrap_or_else(|| std::env::consts::OS.to_string());
    let version = sysinfo::System::os_version().unwrap_or_else(|| "unknown".to_string());
    match sysinfo::System::host_name() {
        Some(host) => format!("{os} {version} ({host})"),
        None => format!("{os} {version}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_active_session_resolves_to_none() {
        let directory = StaticSessionDirectory {
            user_id: "u-1".into(),
            session_id: None,
            course_id: "course-7".into(),
        };
        assert!(resolve_report_context(&directory).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_session_resolves_full_context() {
        let directory = StaticSessionDirectory {
            user_id: "u-1".into(),
            session_id: Some("s-9".into()),
            course_id: "course-7".into(),
        };
        let context = resolve_report_context(&directory).await.unwrap().unwrap();
        assert_eq!(context.user_id, "u-1");
        assert_eq!(context.session_id, "s-9");
        assert_eq!(context.course_id, "course-7");
        assert!(context.captured_at_ms > 0);
    }

    #[test]
    fn device_descriptor_is_not_empty() {
        assert!(!device_descriptor().is_empty());
    }
}

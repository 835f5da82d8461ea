//! `CareEngine`: one shared entry point over the care store.
//!
//! Owns the SQLite connection behind a mutex, stamps operations with the
//! current UTC time and forwards alert events to the configured sink.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::care::{
    self, AlertSink, CareError, CheckInReceipt, NewNeed, NewResponsibility, ScanReport,
    SqliteUserDirectory, UserDirectory,
};
use crate::config::{self, EngineConfig};
use crate::db::sqlite::{open_database_with_timeout, open_memory_database};
use crate::db::to_stored_precision;
use crate::models::enums::{AlertEventKind, CheckInStatus, NeedStatus};
use crate::models::{
    AlertEvent, AssignmentSuggestion, CareCircle, CareNeed, CareResponsibility, CheckIn,
    CircleConfig, CircleSettings, EmergencyAlert, MissedCheckInAlert, ResponseInput,
    TriggerOptions, UserProfile,
};
use crate::sync::{self, MergeReport, StoreSnapshot};

pub struct CareEngine {
    conn: Mutex<Connection>,
    directory: Box<dyn UserDirectory>,
    sink: Option<Arc<dyn AlertSink>>,
    config: EngineConfig,
}

impl CareEngine {
    /// Open (creating and migrating if needed) the database at `path`.
    pub fn open(path: &Path, config: EngineConfig) -> Result<Self, CareError> {
        config.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(crate::config::ConfigError::from)?;
        }
        let conn = open_database_with_timeout(path, config.busy_timeout())?;
        tracing::info!(path = %path.display(), "care store opened");
        Ok(Self::with_connection(conn, config))
    }

    /// Open the store in the application data directory, reading
    /// `engine.json` from there when present.
    pub fn open_default() -> Result<Self, CareError> {
        let config = EngineConfig::load_or_default(&config::config_path())?;
        Self::open(&config::database_path(), config)
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self, CareError> {
        config.validate()?;
        Ok(Self::with_connection(open_memory_database()?, config))
    }

    fn with_connection(conn: Connection, config: EngineConfig) -> Self {
        Self {
            conn: Mutex::new(conn),
            directory: Box::new(SqliteUserDirectory),
            sink: None,
            config,
        }
    }

    /// Validate circle members against another directory.
    pub fn with_directory(mut self, directory: Box<dyn UserDirectory>) -> Self {
        self.directory = directory;
        self
    }

    /// Deliver alert events to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CareError> {
        self.conn.lock().map_err(|_| CareError::LockPoisoned)
    }

    fn now() -> NaiveDateTime {
        to_stored_precision(Utc::now().naive_utc())
    }

    fn publish(&self, event: AlertEvent) {
        if let Some(sink) = &self.sink {
            sink.deliver(&event);
        }
    }

    // ═══════════════════════════════════════════
    // Users & circles
    // ═══════════════════════════════════════════

    pub fn register_user(&self, display_name: &str) -> Result<UserProfile, CareError> {
        care::register_user(&*self.lock()?, display_name, Self::now())
    }

    /// Create a circle; `config` defaults to the engine's circle defaults.
    pub fn create_circle(
        &self,
        recipient_id: Uuid,
        members: &[Uuid],
        config: Option<CircleConfig>,
    ) -> Result<CareCircle, CareError> {
        let config = config.unwrap_or_else(|| self.config.circle_defaults());
        let conn = self.lock()?;
        care::create_circle(&conn, self.directory.as_ref(), recipient_id, members, config, Self::now())
    }

    pub fn add_member(&self, circle_id: &Uuid, member_id: Uuid) -> Result<CareCircle, CareError> {
        let conn = self.lock()?;
        care::add_member(&conn, self.directory.as_ref(), circle_id, member_id, Self::now())
    }

    pub fn remove_member(&self, circle_id: &Uuid, member_id: &Uuid) -> Result<CareCircle, CareError> {
        care::remove_member(&*self.lock()?, circle_id, member_id, Self::now())
    }

    pub fn update_settings(
        &self,
        circle_id: &Uuid,
        settings: &CircleSettings,
    ) -> Result<CareCircle, CareError> {
        care::update_settings(&*self.lock()?, circle_id, settings, Self::now())
    }

    pub fn set_monitoring_enabled(&self, circle_id: &Uuid, enabled: bool) -> Result<CareCircle, CareError> {
        care::set_monitoring_enabled(&*self.lock()?, circle_id, enabled, Self::now())
    }

    pub fn delete_circle(&self, recipient_id: &Uuid) -> Result<(), CareError> {
        care::delete_circle(&*self.lock()?, recipient_id)
    }

    pub fn get_circle(&self, circle_id: &Uuid) -> Result<CareCircle, CareError> {
        care::get_circle(&*self.lock()?, circle_id)
    }

    pub fn get_circle_for_recipient(&self, recipient_id: &Uuid) -> Result<Option<CareCircle>, CareError> {
        care::get_circle_for_recipient(&*self.lock()?, recipient_id)
    }

    pub fn list_monitored_circles(&self) -> Result<Vec<CareCircle>, CareError> {
        care::list_monitored_circles(&*self.lock()?)
    }

    // ═══════════════════════════════════════════
    // Check-ins & missed check-in alerts
    // ═══════════════════════════════════════════

    pub fn record_check_in(
        &self,
        user_id: Uuid,
        status: CheckInStatus,
        message: Option<String>,
    ) -> Result<CheckInReceipt, CareError> {
        care::record_check_in(&*self.lock()?, user_id, status, message, Self::now())
    }

    pub fn latest_check_in(&self, user_id: &Uuid) -> Result<Option<CheckIn>, CareError> {
        care::latest_check_in(&*self.lock()?, user_id)
    }

    pub fn acknowledge_check_in(&self, check_in_id: &Uuid, member_id: &Uuid) -> Result<CheckIn, CareError> {
        care::acknowledge_check_in(&*self.lock()?, check_in_id, member_id, Self::now())
    }

    /// Run one monitoring pass as of `now` and publish its events.
    pub fn scan(&self, now: NaiveDateTime) -> Result<ScanReport, CareError> {
        let report = care::scan(&*self.lock()?, now)?;
        for event in &report.events {
            self.publish(event.clone());
        }
        Ok(report)
    }

    pub fn scan_now(&self) -> Result<ScanReport, CareError> {
        self.scan(Self::now())
    }

    pub fn acknowledge_alert(
        &self,
        alert_id: &Uuid,
        member_id: &Uuid,
    ) -> Result<MissedCheckInAlert, CareError> {
        care::acknowledge_alert(&*self.lock()?, alert_id, member_id, Self::now())
    }

    pub fn clear_alerts_for_user(&self, user_id: &Uuid) -> Result<Vec<Uuid>, CareError> {
        care::clear_alerts_for_user(&*self.lock()?, user_id, Self::now())
    }

    pub fn list_alerts_for_circle(&self, circle_id: &Uuid) -> Result<Vec<MissedCheckInAlert>, CareError> {
        care::list_alerts_for_circle(&*self.lock()?, circle_id)
    }

    // ═══════════════════════════════════════════
    // Emergencies
    // ═══════════════════════════════════════════

    pub fn trigger_emergency(
        &self,
        user_id: Uuid,
        options: TriggerOptions,
    ) -> Result<EmergencyAlert, CareError> {
        let now = Self::now();
        let alert = care::trigger_emergency(&*self.lock()?, user_id, options, now)?;
        self.publish(AlertEvent::for_emergency(&alert, AlertEventKind::EmergencyTriggered, now));
        Ok(alert)
    }

    pub fn respond_to_emergency(
        &self,
        alert_id: &Uuid,
        responder_id: &Uuid,
        input: ResponseInput,
    ) -> Result<EmergencyAlert, CareError> {
        let now = Self::now();
        let alert = care::respond_to_emergency(&*self.lock()?, alert_id, responder_id, input, now)?;
        self.publish(AlertEvent::for_emergency(&alert, AlertEventKind::EmergencyResponse, now));
        if alert.resolved {
            self.publish(AlertEvent::for_emergency(&alert, AlertEventKind::EmergencyResolved, now));
        }
        Ok(alert)
    }

    pub fn resolve_emergency(
        &self,
        alert_id: &Uuid,
        resolved_by: &Uuid,
        reason: Option<&str>,
    ) -> Result<EmergencyAlert, CareError> {
        let now = Self::now();
        let alert = care::resolve_emergency(&*self.lock()?, alert_id, resolved_by, reason, now)?;
        self.publish(AlertEvent::for_emergency(&alert, AlertEventKind::EmergencyResolved, now));
        Ok(alert)
    }

    pub fn cancel_emergency(
        &self,
        alert_id: &Uuid,
        user_id: &Uuid,
        reason: Option<&str>,
    ) -> Result<EmergencyAlert, CareError> {
        let now = Self::now();
        let alert = care::cancel_emergency(&*self.lock()?, alert_id, user_id, reason, now)?;
        self.publish(AlertEvent::for_emergency(&alert, AlertEventKind::EmergencyCancelled, now));
        Ok(alert)
    }

    pub fn get_emergency(&self, alert_id: &Uuid) -> Result<EmergencyAlert, CareError> {
        care::get_emergency(&*self.lock()?, alert_id)
    }

    pub fn list_active_emergencies(&self, circle_id: &Uuid) -> Result<Vec<EmergencyAlert>, CareError> {
        care::list_active_emergencies(&*self.lock()?, circle_id)
    }

    // ═══════════════════════════════════════════
    // Responsibilities & needs
    // ═══════════════════════════════════════════

    pub fn add_responsibility(
        &self,
        circle_id: &Uuid,
        input: NewResponsibility,
    ) -> Result<CareResponsibility, CareError> {
        care::add_responsibility(&*self.lock()?, circle_id, input, Self::now())
    }

    pub fn complete_responsibility(
        &self,
        responsibility_id: &Uuid,
        completed_by: &Uuid,
        notes: Option<&str>,
    ) -> Result<CareResponsibility, CareError> {
        care::complete_responsibility(&*self.lock()?, responsibility_id, completed_by, notes, Self::now())
    }

    pub fn assign_responsibility(
        &self,
        responsibility_id: &Uuid,
        member_id: &Uuid,
    ) -> Result<CareResponsibility, CareError> {
        care::assign_responsibility(&*self.lock()?, responsibility_id, member_id, Self::now())
    }

    pub fn suggest_distribution(&self, circle_id: &Uuid) -> Result<Vec<AssignmentSuggestion>, CareError> {
        care::suggest_distribution(&*self.lock()?, circle_id)
    }

    pub fn list_responsibilities(&self, circle_id: &Uuid) -> Result<Vec<CareResponsibility>, CareError> {
        care::list_responsibilities(&*self.lock()?, circle_id)
    }

    pub fn add_need(&self, circle_id: &Uuid, input: NewNeed) -> Result<CareNeed, CareError> {
        care::add_need(&*self.lock()?, circle_id, input, Self::now())
    }

    pub fn update_need_status(&self, need_id: &Uuid, status: NeedStatus) -> Result<CareNeed, CareError> {
        care::update_need_status(&*self.lock()?, need_id, status, Self::now())
    }

    pub fn list_needs(&self, circle_id: &Uuid) -> Result<Vec<CareNeed>, CareError> {
        care::list_needs(&*self.lock()?, circle_id)
    }

    // ═══════════════════════════════════════════
    // Replica merge
    // ═══════════════════════════════════════════

    pub fn export_snapshot(&self) -> Result<StoreSnapshot, CareError> {
        sync::export_snapshot(&*self.lock()?, Self::now())
    }

    pub fn merge_snapshot(&self, remote: &StoreSnapshot) -> Result<MergeReport, CareError> {
        sync::merge_snapshot(&*self.lock()?, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::CollectingSink;
    use crate::models::enums::ResponseStatus;

    fn engine_with_sink() -> (CareEngine, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let engine = CareEngine::open_in_memory(EngineConfig::default())
            .unwrap()
            .with_sink(sink.clone());
        (engine, sink)
    }

    fn household(engine: &CareEngine) -> (UserProfile, UserProfile, CareCircle) {
        let recipient = engine.register_user("Grandma").unwrap();
        let member = engine.register_user("Sam").unwrap();
        let circle = engine.create_circle(recipient.id, &[member.id], None).unwrap();
        (recipient, member, circle)
    }

    #[test]
    fn circles_use_engine_defaults() {
        let config = EngineConfig {
            default_missed_check_in_threshold_hours: 12,
            ..Default::default()
        };
        let engine = CareEngine::open_in_memory(config).unwrap();
        let (recipient, _, circle) = household(&engine);
        assert_eq!(circle.config.missed_check_in_threshold, 12);
        assert_eq!(
            engine.get_circle_for_recipient(&recipient.id).unwrap(),
            Some(circle)
        );
    }

    #[test]
    fn emergency_lifecycle_publishes_events() {
        let (engine, sink) = engine_with_sink();
        let (recipient, member, _) = household(&engine);

        let alert = engine
            .trigger_emergency(recipient.id, TriggerOptions::default())
            .unwrap();
        engine
            .respond_to_emergency(&alert.id, &member.id, ResponseInput::new(ResponseStatus::Arrived))
            .unwrap();

        let kinds: Vec<AlertEventKind> = sink.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AlertEventKind::EmergencyTriggered,
                AlertEventKind::EmergencyResponse,
                AlertEventKind::EmergencyResolved,
            ]
        );
        assert!(engine.list_active_emergencies(&alert.care_circle_id).unwrap().is_empty());
    }

    #[test]
    fn returned_records_match_stored_copies() {
        let engine = CareEngine::open_in_memory(EngineConfig::default()).unwrap();
        let (recipient, member, circle) = household(&engine);
        assert_eq!(engine.get_circle(&circle.id).unwrap(), circle);

        let triggered = engine
            .trigger_emergency(recipient.id, TriggerOptions::default())
            .unwrap();
        assert_eq!(engine.get_emergency(&triggered.id).unwrap(), triggered);

        let resolved = engine
            .resolve_emergency(&triggered.id, &member.id, None)
            .unwrap();
        assert_eq!(resolved.triggered_at, triggered.triggered_at);
        assert_eq!(resolved.message, triggered.message);

        let receipt = engine
            .record_check_in(recipient.id, CheckInStatus::Okay, None)
            .unwrap();
        assert_eq!(
            engine.latest_check_in(&recipient.id).unwrap(),
            Some(receipt.check_in)
        );
    }

    #[test]
    fn cancel_publishes_info_event() {
        let (engine, sink) = engine_with_sink();
        let (recipient, _, _) = household(&engine);
        let alert = engine
            .trigger_emergency(recipient.id, TriggerOptions::default())
            .unwrap();
        sink.drain();

        let cancelled = engine.cancel_emergency(&alert.id, &recipient.id, None).unwrap();
        assert!(cancelled.is_cancelled());
        let events = sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::EmergencyCancelled);
        assert_eq!(events[0].severity, crate::models::enums::AlertLevel::Info);
    }

    #[test]
    fn scan_publishes_missed_check_in() {
        let (engine, sink) = engine_with_sink();
        let (recipient, member, circle) = household(&engine);

        let later = Utc::now().naive_utc() + chrono::Duration::hours(30);
        let report = engine.scan(later).unwrap();
        assert_eq!(report.events.len(), 1);
        assert_eq!(sink.drain(), report.events);

        let alert_id = report.events[0].alert_id;
        let alert = engine.acknowledge_alert(&alert_id, &member.id).unwrap();
        assert!(alert.acknowledged);
        assert_eq!(engine.list_alerts_for_circle(&circle.id).unwrap().len(), 1);

        let receipt = engine.record_check_in(recipient.id, CheckInStatus::Okay, None).unwrap();
        assert!(receipt.cleared_alerts.is_empty());
    }

    #[test]
    fn engines_merge_through_snapshots() {
        let a = CareEngine::open_in_memory(EngineConfig::default()).unwrap();
        let b = CareEngine::open_in_memory(EngineConfig::default()).unwrap();
        let (recipient, member, circle) = household(&a);
        b.merge_snapshot(&a.export_snapshot().unwrap()).unwrap();

        let need = b
            .add_need(
                &circle.id,
                NewNeed {
                    need_type: "meals".into(),
                    description: "dinner on Tuesdays".into(),
                    priority: None,
                },
            )
            .unwrap();
        let item = b
            .add_responsibility(
                &circle.id,
                NewResponsibility {
                    responsibility_type: "errand".into(),
                    description: "pharmacy pickup".into(),
                    frequency: None,
                    assigned_to: None,
                },
            )
            .unwrap();
        a.merge_snapshot(&b.export_snapshot().unwrap()).unwrap();

        assert_eq!(a.list_needs(&circle.id).unwrap(), vec![need]);
        let suggestions = a.suggest_distribution(&circle.id).unwrap();
        assert_eq!(suggestions[0].responsibility_id, item.id);
        assert_eq!(suggestions[0].suggested_member_id, member.id);
        assert!(a.get_circle_for_recipient(&recipient.id).unwrap().is_some());
    }

    #[test]
    fn file_store_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join(config::DATABASE_FILE_NAME);
        let recipient_id = {
            let engine = CareEngine::open(&path, EngineConfig::default()).unwrap();
            let (recipient, _, _) = household(&engine);
            recipient.id
        };
        let engine = CareEngine::open(&path, EngineConfig::default()).unwrap();
        assert!(engine.get_circle_for_recipient(&recipient_id).unwrap().is_some());
        assert!(matches!(
            engine.delete_circle(&Uuid::new_v4()),
            Err(CareError::NoCareCircle(_))
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            scan_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            CareEngine::open_in_memory(config),
            Err(CareError::Config(_))
        ));
    }
}

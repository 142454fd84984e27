use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, InvalidInput, Result},
    image_model::PredictionService,
    job::{JobDescriptor, JobResult},
    poller::{PollConfig, PollOutcome, poll_until_terminal},
};

#[derive(Debug)]
pub struct SessionEvent {
    /// Which call to [`Session::generate`] this event belongs to
    pub generation: u64,
    pub kind: EventKind,
}

#[derive(Debug)]
pub enum EventKind {
    Submitted(JobDescriptor),
    Updated(JobDescriptor),
    Succeeded(JobResult),
    Failed(Error),
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }
}

struct ActiveJob {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the one generation job a user is waiting for.
///
/// Starting a new generation cancels the previous one before anything is
/// submitted, and events of a superseded job are dropped, so a front-end
/// never sees an old job's update after the new job's first one.
pub struct Session {
    service: Arc<dyn PredictionService>,
    poll_config: PollConfig,
    current: Arc<Mutex<u64>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    active: Option<ActiveJob>,
}

/// Forwards events of one generation, as long as it is the current one
struct EventSink {
    generation: u64,
    current: Arc<Mutex<u64>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    fn emit(&self, kind: EventKind) {
        // Holding the lock while sending orders this send before any event of
        // a newer generation.
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != self.generation {
            debug!("Dropping event of superseded generation {}", self.generation);
            return;
        }
        _ = self.events.send(SessionEvent {
            generation: self.generation,
            kind,
        });
    }
}

impl Session {
    pub fn new(
        service: Arc<dyn PredictionService>,
        poll_config: PollConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = Self {
            service,
            poll_config,
            current: Arc::new(Mutex::new(0)),
            events,
            active: None,
        };
        (session, rx)
    }

    /// Starts generating an image for `prompt` and returns the generation
    /// number its events are tagged with. Blank input is rejected without
    /// touching the network. Must be called from within a tokio runtime.
    pub fn generate(&mut self, prompt: &str) -> Result<u64> {
        if prompt.trim().is_empty() {
            return Err(InvalidInput::EmptyPrompt.into());
        }
        if self.service.credential().is_blank() {
            return Err(InvalidInput::EmptyCredential.into());
        }

        self.cancel();

        let generation = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            *current += 1;
            *current
        };
        info!("Starting generation {generation}");

        let cancel = CancellationToken::new();
        let sink = EventSink {
            generation,
            current: self.current.clone(),
            events: self.events.clone(),
        };
        let task = tokio::spawn(run_job(
            self.service.clone(),
            prompt.to_string(),
            self.poll_config.clone(),
            cancel.clone(),
            sink,
        ));

        self.active = Some(ActiveJob {
            generation,
            cancel,
            task,
        });
        Ok(generation)
    }

    /// Stops the active poll loop, if any. No further events of it are
    /// delivered.
    pub fn cancel(&mut self) {
        if let Some(job) = self.active.take() {
            if !job.task.is_finished() {
                debug!("Cancelling generation {}", job.generation);
            }
            job.cancel.cancel();
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == job.generation {
                // no generation owns the number anymore
                *current += 1;
            }
        }
    }

    pub fn active_generation(&self) -> Option<u64> {
        self.active
            .as_ref()
            .filter(|job| !job.task.is_finished())
            .map(|job| job.generation)
    }

    /// Asks the service to stop working on `descriptor`. The local poll
    /// loop is left alone, see [`Session::cancel`] for that.
    pub async fn cancel_remote(&self, descriptor: &JobDescriptor) -> Result<JobDescriptor> {
        self.service.cancel(&descriptor.urls.cancel).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(job) = &self.active {
            job.cancel.cancel();
        }
    }
}

async fn run_job(
    service: Arc<dyn PredictionService>,
    prompt: String,
    poll_config: PollConfig,
    cancel: CancellationToken,
    sink: EventSink,
) {
    let submitted = tokio::select! {
        _ = cancel.cancelled() => return,
        res = service.submit(&prompt) => res,
    };

    let descriptor = match submitted {
        Ok(d) => d,
        Err(e) => {
            sink.emit(EventKind::Failed(e));
            return;
        }
    };
    sink.emit(EventKind::Submitted(descriptor.clone()));

    let outcome = poll_until_terminal(service.as_ref(), descriptor, &poll_config, &cancel, |d| {
        sink.emit(EventKind::Updated(d.clone()))
    })
    .await;

    match outcome {
        Ok(PollOutcome::Succeeded(result)) => sink.emit(EventKind::Succeeded(result)),
        Ok(PollOutcome::Cancelled) => debug!("Generation {} cancelled", sink.generation),
        Err(e) => sink.emit(EventKind::Failed(e)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;

    use super::*;
    use crate::{
        credential::Credential,
        job::JobStatus,
        test_support::{ScriptedService, job, succeeded},
    };

    fn session(service: &Arc<ScriptedService>) -> (Session, mpsc::UnboundedReceiver<SessionEvent>) {
        Session::new(service.clone(), PollConfig::default())
    }

    async fn until_terminal(
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Vec<SessionEvent> {
        let mut events = vec![];
        while let Some(ev) = rx.recv().await {
            let done = ev.kind.is_terminal();
            events.push(ev);
            if done {
                break;
            }
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn generates_an_image() {
        let service = Arc::new(
            ScriptedService::default()
                .with_submission(Ok(job("a", JobStatus::Starting)))
                .with_statuses(
                    "a",
                    vec![
                        Ok(job("a", JobStatus::Processing)),
                        Ok(succeeded("a", &["https://cdn.example/a.png"])),
                    ],
                ),
        );
        let (mut session, mut rx) = session(&service);

        let generation = session.generate("a red fox").unwrap();
        let events = until_terminal(&mut rx).await;

        assert!(events.iter().all(|e| e.generation == generation));
        assert!(matches!(events[0].kind, EventKind::Submitted(_)));
        assert!(matches!(events[1].kind, EventKind::Updated(_)));
        let EventKind::Succeeded(result) = &events[2].kind else {
            panic!("expected success, got {events:?}");
        };
        assert_eq!(result.image_url(), "https://cdn.example/a.png");
        assert_eq!(service.prompts(), vec!["a red fox".to_string()]);
    }

    #[tokio::test]
    async fn blank_input_never_reaches_the_service() {
        let service = Arc::new(ScriptedService::default());
        let (mut session, _rx) = session(&service);
        assert!(matches!(
            session.generate("   "),
            Err(Error::InvalidInput(InvalidInput::EmptyPrompt))
        ));

        let keyless = Arc::new(ScriptedService::default().with_credential(Credential::new(" ")));
        let (mut session, _rx) = Session::new(keyless.clone(), PollConfig::default());
        assert!(matches!(
            session.generate("a red fox"),
            Err(Error::InvalidInput(InvalidInput::EmptyCredential))
        ));

        assert!(service.prompts().is_empty());
        assert!(keyless.prompts().is_empty());
        assert_eq!(session.active_generation(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_errors_are_reported() {
        let service = Arc::new(
            ScriptedService::default().with_submission(Err(StatusCode::PAYMENT_REQUIRED)),
        );
        let (mut session, mut rx) = session(&service);

        session.generate("a red fox").unwrap();
        let events = until_terminal(&mut rx).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].kind,
            EventKind::Failed(Error::BillingRequired { .. })
        ));
        assert_eq!(service.status_checks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_generation_supersedes_the_old_one() {
        let service = Arc::new(
            ScriptedService::default()
                .with_submission(Ok(job("old", JobStatus::Starting)))
                .with_submission(Ok(job("new", JobStatus::Starting)))
                .with_statuses("old", vec![Ok(job("old", JobStatus::Processing))])
                .with_statuses(
                    "new",
                    vec![
                        Ok(job("new", JobStatus::Processing)),
                        Ok(job("new", JobStatus::Processing)),
                        Ok(succeeded("new", &["u-new"])),
                    ],
                ),
        );
        let (mut session, mut rx) = session(&service);

        let first = session.generate("first").unwrap();
        loop {
            let ev = rx.recv().await.unwrap();
            if matches!(ev.kind, EventKind::Updated(_)) {
                assert_eq!(ev.generation, first);
                break;
            }
        }

        let second = session.generate("second").unwrap();
        assert_ne!(first, second);

        let events = until_terminal(&mut rx).await;
        let first_new = events
            .iter()
            .position(|e| e.generation == second)
            .expect("no event of the new generation");
        assert!(events[first_new..].iter().all(|e| e.generation == second));
        assert!(matches!(
            &events.last().unwrap().kind,
            EventKind::Succeeded(r) if r.image_url() == "u-new"
        ));

        // the old loop really stopped polling
        let checks = service.status_checks();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(service.status_checks(), checks);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_silences_the_active_job() {
        let service = Arc::new(
            ScriptedService::default()
                .with_submission(Ok(job("a", JobStatus::Starting)))
                .with_statuses("a", vec![Ok(job("a", JobStatus::Processing))]),
        );
        let (mut session, mut rx) = session(&service);

        session.generate("a red fox").unwrap();
        let submitted = rx.recv().await.unwrap();
        assert!(matches!(submitted.kind, EventKind::Submitted(_)));

        session.cancel();
        assert_eq!(session.active_generation(), None);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_remote_uses_the_cancel_url() {
        let service = Arc::new(ScriptedService::default());
        let (session, _rx) = session(&service);

        let canceled = session
            .cancel_remote(&job("abc", JobStatus::Processing))
            .await
            .unwrap();

        assert_eq!(canceled.status, JobStatus::Canceled);
        assert_eq!(
            service.cancels(),
            vec!["https://api.replicate.com/v1/predictions/abc/cancel".to_string()]
        );
    }
}

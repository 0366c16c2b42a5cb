use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheSource, CacheStorage};
use crate::http::{Request, Response};
use crate::worker::{
  ClickOutcome, ClientMessage, MessageOutcome, Notification, OfflineWorker, SyncReport,
};

/// Background work an event handler started and that must finish before the
/// event counts as settled.
#[derive(Debug, Default)]
pub struct WaitUntil {
  tasks: Vec<JoinHandle<Result<()>>>,
}

impl WaitUntil {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, task: JoinHandle<Result<()>>) {
    self.tasks.push(task);
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  /// Wait for every task. All tasks run to completion; the first failure is returned.
  pub async fn settled(self) -> Result<()> {
    let mut first_error = None;
    for joined in join_all(self.tasks).await {
      let result = joined
        .map_err(|e| eyre!("Background task panicked: {}", e))
        .and_then(|result| result);
      if let Err(err) = result {
        warn!(error = %err, "background task failed");
        first_error.get_or_insert(err);
      }
    }
    match first_error {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

/// Worker events
#[derive(Debug)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  Message(ClientMessage),
  Sync { tag: String },
  Push { payload: Option<String> },
  NotificationClick {
    notification: Notification,
    action: Option<String>,
  },
}

/// Result of one handled event
#[derive(Debug)]
pub enum Outcome {
  /// `activate_now` when the host should dispatch `Activate` right away
  Installed { activate_now: bool },
  Activated { deleted: Vec<String> },
  Responded {
    response: Response,
    source: CacheSource,
  },
  Message(MessageOutcome),
  Synced(SyncReport),
  Notified(Notification),
  Clicked(ClickOutcome),
}

impl<S: CacheStorage + 'static> OfflineWorker<S> {
  /// Run the handler for one event.
  pub async fn handle(&self, event: Event) -> Result<(Outcome, WaitUntil)> {
    let outcome = match event {
      Event::Install => {
        self.install().await?;
        Outcome::Installed {
          activate_now: self.ready_to_activate()?,
        }
      }
      Event::Activate => Outcome::Activated {
        deleted: self.activate().await?,
      },
      Event::Fetch(request) => {
        let responded = self.fetch(request).await?;
        return Ok((
          Outcome::Responded {
            response: responded.response,
            source: responded.source,
          },
          responded.wait_until,
        ));
      }
      Event::Message(message) => {
        let (outcome, wait) = self.message(message).await?;
        return Ok((Outcome::Message(outcome), wait));
      }
      Event::Sync { tag } => Outcome::Synced(self.sync(&tag).await?),
      Event::Push { payload } => Outcome::Notified(self.push(payload.as_deref()).await?),
      Event::NotificationClick {
        notification,
        action,
      } => Outcome::Clicked(
        self
          .notification_click(&notification, action.as_deref())
          .await?,
      ),
    };
    Ok((outcome, WaitUntil::new()))
  }
}

struct Dispatch {
  event: Event,
  reply: oneshot::Sender<Result<(Outcome, WaitUntil)>>,
}

/// Event loop that hands each event to its own task, so a slow fetch never
/// holds up the events queued behind it.
pub struct EventLoop {
  tx: mpsc::UnboundedSender<Dispatch>,
}

impl EventLoop {
  /// Start the loop on the current runtime.
  pub fn new<S: CacheStorage + 'static>(worker: OfflineWorker<S>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();

    tokio::spawn(async move {
      while let Some(Dispatch { event, reply }) = rx.recv().await {
        let worker = worker.clone();
        tokio::spawn(async move {
          let result = worker.handle(event).await;
          if reply.send(result).is_err() {
            debug!("event result dropped by caller");
          }
        });
      }
    });

    Self { tx }
  }

  pub fn dispatch(&self, event: Event) -> Result<EventTask> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Dispatch { event, reply })
      .map_err(|_| eyre!("Event loop has shut down"))?;
    Ok(EventTask { rx })
  }

  /// Dispatch an event and wait until it has settled.
  pub async fn run(&self, event: Event) -> Result<Outcome> {
    self.dispatch(event)?.settled().await
  }
}

/// Handle to a dispatched event
pub struct EventTask {
  rx: oneshot::Receiver<Result<(Outcome, WaitUntil)>>,
}

impl EventTask {
  /// The handler's answer, with its background work still running.
  pub async fn outcome(self) -> Result<(Outcome, WaitUntil)> {
    self
      .rx
      .await
      .map_err(|_| eyre!("Event handler stopped before answering"))?
  }

  pub async fn settled(self) -> Result<Outcome> {
    let (outcome, wait) = self.outcome().await?;
    wait.settled().await?;
    Ok(outcome)
  }
}

pub mod impls;

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serial_test::serial;

use crate::{
    common::{ClientId, ClientUpdate, Report},
    model::{tests::weights, Weights},
    settings::{tests::settings, Settings},
    simulation::Simulation,
    state_machine::{
        events::{EventSubscriber, RunOutcome},
        phases::PhaseName,
        StateMachine,
        StateMachineInitializer,
    },
    storage::{Checkpoint, CheckpointStorage, FileStorage, NoopStorage, StorageResult},
    transport::{ClientMessage, LocalTransport, RoundAssignment, Transport, TransportError},
};

/// A transport that accepts every assignment and never answers.
pub struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn send(&mut self, _assignment: RoundAssignment) -> Result<(), TransportError> {
        Ok(())
    }

    async fn receive(&mut self) -> Result<ClientMessage, TransportError> {
        futures::future::pending().await
    }
}

/// A transport that replays prepared messages and records every assignment.
#[derive(Default)]
pub struct ScriptedTransport {
    unreachable: BTreeSet<ClientId>,
    messages: VecDeque<ClientMessage>,
    sent: Arc<Mutex<Vec<RoundAssignment>>>,
}

impl ScriptedTransport {
    pub fn unreachable(mut self, ids: &[u32]) -> Self {
        self.unreachable = ids.iter().copied().map(ClientId::from).collect();
        self
    }

    pub fn with_messages(mut self, messages: Vec<ClientMessage>) -> Self {
        self.messages = messages.into();
        self
    }

    pub fn sent(&self) -> Arc<Mutex<Vec<RoundAssignment>>> {
        self.sent.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, assignment: RoundAssignment) -> Result<(), TransportError> {
        if self.unreachable.contains(&assignment.client_id) {
            return Err(TransportError::Unreachable(assignment.client_id));
        }
        self.sent.lock().unwrap().push(assignment);
        Ok(())
    }

    async fn receive(&mut self) -> Result<ClientMessage, TransportError> {
        match self.messages.pop_front() {
            Some(message) => Ok(message),
            None => futures::future::pending().await,
        }
    }
}

/// A storage whose disk is always full.
pub struct FailingStorage;

#[async_trait]
impl CheckpointStorage for FailingStorage {
    async fn save(&mut self, _seed: u64, _checkpoint: &Checkpoint) -> StorageResult<()> {
        Err(anyhow::anyhow!("no space left on device"))
    }

    async fn latest(&mut self, _seed: u64) -> StorageResult<Option<Checkpoint>> {
        Ok(None)
    }
}

pub fn update(id: u32, num_samples: usize) -> ClientUpdate {
    ClientUpdate {
        report: Report {
            client_id: ClientId::from(id),
            num_samples,
            accuracy: 0.,
            training_time: 0.,
            data_loading_time: 0.,
            metrics: BTreeMap::new(),
        },
        weights: weights(&[("w", vec![0.])]),
        encrypt_mask: None,
    }
}

fn simulation_settings(checkpoints: &Path, rounds: u32) -> Settings {
    let mut settings = settings();
    settings.datasource.num_train_examples = 1000;
    settings.datasource.num_test_examples = 100;
    settings.datasource.num_labels = 4;
    settings.datasource.num_features = 2;
    settings.clients.total_clients = 10;
    settings.clients.per_round = 5;
    settings.clients.concurrency = Some(2);
    settings.server.rounds = rounds;
    settings.server.random_seed = 5;
    settings.checkpoint.path = checkpoints.to_path_buf();
    settings
}

async fn simulation(
    settings: &Settings,
) -> (StateMachine<LocalTransport, FileStorage>, EventSubscriber) {
    let simulation = Simulation::new(settings).unwrap();
    StateMachineInitializer::new(
        settings,
        simulation.initial_weights().unwrap(),
        simulation.spawn_clients(),
        FileStorage::new(&settings.checkpoint.path),
    )
    .init()
    .await
    .unwrap()
}

/// Runs the machine to completion and returns the selection of every round and the final
/// global weights.
async fn run_recording<T, C>(
    mut state_machine: StateMachine<T, C>,
) -> (Vec<BTreeSet<ClientId>>, Weights)
where
    T: Transport,
    C: CheckpointStorage,
{
    let mut selections = Vec::new();
    loop {
        let weights = state_machine.shared().global_weights().clone();
        state_machine = match state_machine.next().await {
            Some(next) => next,
            None => return (selections, weights),
        };
        if state_machine.is_distributing() {
            selections.push(state_machine.shared().state.selected_clients.clone());
        }
    }
}

#[tokio::test]
#[serial]
async fn test_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let settings = simulation_settings(dir.path(), 3);
    let (state_machine, events) = simulation(&settings).await;
    let initial = settings_initial_weights(&settings);

    let (selections, weights) = run_recording(state_machine).await;

    assert_eq!(selections.len(), 3);
    assert!(selections.iter().all(|selected| selected.len() == 5));
    assert_ne!(weights, initial);
    weights.check_layout(&initial).unwrap();

    assert_eq!(
        events.outcome_listener().get_latest().event,
        RunOutcome::Finished
    );
    assert_eq!(
        events.phase_listener().get_latest().event,
        PhaseName::Shutdown
    );
    let stats = events.stats_listener().get_latest().event;
    assert_eq!(stats.received, 5);
    assert_eq!(stats.failed + stats.missing + stats.dropped, 0);

    let mut store = FileStorage::new(dir.path());
    let checkpoint = store.latest(5).await.unwrap().unwrap();
    assert_eq!(checkpoint.round, 3);
    assert_eq!(checkpoint.weights, weights);
}

fn settings_initial_weights(settings: &Settings) -> Weights {
    Simulation::new(settings).unwrap().initial_weights().unwrap()
}

/// Interrupts a 4 round run after round 2, resumes it and compares it with an uninterrupted
/// run.
async fn assert_resumed_run_matches(reload_data: bool) {
    let settings = |dir: &Path, rounds| {
        let mut settings = simulation_settings(dir, rounds);
        settings.data.reload_data = reload_data;
        settings
    };

    let uninterrupted = tempfile::tempdir().unwrap();
    let (state_machine, _events) = simulation(&settings(uninterrupted.path(), 4)).await;
    let (expected_selections, expected_weights) = run_recording(state_machine).await;

    let interrupted = tempfile::tempdir().unwrap();
    let (state_machine, _events) = simulation(&settings(interrupted.path(), 2)).await;
    let (mut selections, _) = run_recording(state_machine).await;

    let mut resumed = settings(interrupted.path(), 4);
    resumed.checkpoint.resume = true;
    let (state_machine, _events) = simulation(&resumed).await;
    assert_eq!(state_machine.shared().round(), 3);
    let (resumed_selections, weights) = run_recording(state_machine).await;
    selections.extend(resumed_selections);

    assert_eq!(selections, expected_selections);
    assert_eq!(weights, expected_weights);
}

#[tokio::test]
#[serial]
async fn test_resume_continues_the_run() {
    assert_resumed_run_matches(false).await;
}

#[tokio::test]
#[serial]
async fn test_resume_with_reloaded_data_continues_the_run() {
    assert_resumed_run_matches(true).await;
}

#[tokio::test]
async fn test_unresponsive_clients_abort_the_run() {
    let (state_machine, events) =
        builder::StateMachineBuilder::new(ScriptedTransport::default(), NoopStorage)
            .with_collect_timeout(Duration::from_millis(20))
            .with_max_failed_rounds(1)
            .build();

    assert_eq!(state_machine.run().await, None);
    assert!(matches!(
        events.outcome_listener().get_latest().event,
        RunOutcome::Aborted(_)
    ));
    assert_eq!(events.stats_listener().get_latest().event.missing, 3);
    assert_eq!(events.phase_listener().get_latest().round, 1);
}

#[tokio::test]
async fn test_lost_transport_shuts_down() {
    let (state_machine, events) = builder::StateMachineBuilder::new(
        LocalTransport::spawn::<crate::client::CentroidFactory>(Vec::new()),
        NoopStorage,
    )
    .build();

    assert_eq!(state_machine.run().await, None);
    assert!(matches!(
        events.outcome_listener().get_latest().event,
        RunOutcome::Aborted(_)
    ));
}

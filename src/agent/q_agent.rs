use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Span};

use super::discretizer::{FirstComponentDiscretizer, StateDiscretizer};
use super::replay::{ReplayBuffer, ReplayRecord};
use crate::backtesting::{Allocation, BacktestEnvironment};
use crate::core::indicators::{mean, population_std};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Q-table rows.
    pub buckets: usize,
    pub actions: usize,
    pub learning_rate: f64,
    pub gamma: f64,
    pub epsilon: f64,
    pub epsilon_min: f64,
    pub epsilon_decay: f64,
    pub memory_size: usize,
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            buckets: 10,
            actions: 5,
            learning_rate: 0.001,
            gamma: 0.99,
            epsilon: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 0.995,
            memory_size: 2000,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrainOptions {
    pub episodes: usize,
    pub max_steps: usize,
    pub batch_size: usize,
    pub eval_frequency: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            episodes: 100,
            max_steps: 1000,
            batch_size: 32,
            eval_frequency: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub total_episodes: usize,
    pub mean_reward: f64,
    pub std_reward: f64,
    pub max_reward: f64,
    pub min_reward: f64,
    pub epsilon: f64,
}

/// Turns a discrete action into portfolio weights over the environment's
/// instruments.
pub trait ActionMapper: Send + Sync {
    fn allocation(&self, action: usize, instruments: &[String]) -> Allocation;
}

/// The chosen instrument (`action mod n`) gets 1.5x the equal weight, the
/// rest 0.875x, then everything is renormalized.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverweightMapper;

impl ActionMapper for OverweightMapper {
    fn allocation(&self, action: usize, instruments: &[String]) -> Allocation {
        let n = instruments.len();
        if n == 0 {
            return Allocation::new();
        }
        let base = 1.0 / n as f64;
        let chosen = action % n;
        let raw: Vec<f64> = (0..n)
            .map(|i| if i == chosen { base * 1.5 } else { base * 0.875 })
            .collect();
        let total: f64 = raw.iter().sum();
        instruments
            .iter()
            .zip(raw)
            .map(|(s, w)| (s.clone(), w / total))
            .collect()
    }
}

/// Persisted form of a trained agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QTableFile {
    config: AgentConfig,
    epsilon: f64,
    training_episodes: usize,
    q_table: Vec<Vec<f64>>,
}

/// Tabular Q-learner trained by stepping a `BacktestEnvironment`.
pub struct RLAgent {
    pub config: AgentConfig,
    epsilon: f64,
    q_table: Vec<Vec<f64>>,
    memory: ReplayBuffer,
    discretizer: Box<dyn StateDiscretizer>,
    mapper: Box<dyn ActionMapper>,
    rng: StdRng,
    training_episodes: usize,
    episode_rewards: Vec<f64>,
    span: Span,
}

impl RLAgent {
    pub fn new(config: AgentConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let actions = config.actions.max(1);
        let discretizer = FirstComponentDiscretizer::new(config.buckets);

        Self {
            epsilon: config.epsilon,
            q_table: vec![vec![0.0; actions]; discretizer.buckets()],
            memory: ReplayBuffer::new(config.memory_size),
            discretizer: Box::new(discretizer),
            mapper: Box::new(OverweightMapper),
            rng,
            training_episodes: 0,
            episode_rewards: Vec::new(),
            span: info_span!("rl_agent"),
            config,
        }
    }

    /// Swapping the discretizer resizes the Q-table and clears it.
    pub fn with_discretizer(mut self, discretizer: Box<dyn StateDiscretizer>) -> Self {
        let actions = self.action_count();
        self.q_table = vec![vec![0.0; actions]; discretizer.buckets().max(1)];
        self.discretizer = discretizer;
        self
    }

    pub fn with_mapper(mut self, mapper: Box<dyn ActionMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn q_table(&self) -> &[Vec<f64>] {
        &self.q_table
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn episode_rewards(&self) -> &[f64] {
        &self.episode_rewards
    }

    fn action_count(&self) -> usize {
        self.q_table.first().map(Vec::len).unwrap_or(1)
    }

    fn row(&self, state: &[f64]) -> usize {
        self.discretizer
            .bucket(state)
            .min(self.q_table.len().saturating_sub(1))
    }

    /// Epsilon-greedy when training, greedy otherwise. Ties go to the lowest
    /// action index.
    pub fn act(&mut self, state: &[f64], training: bool) -> usize {
        if training && self.rng.gen::<f64>() < self.epsilon {
            return self.rng.gen_range(0..self.action_count());
        }
        argmax(&self.q_table[self.row(state)])
    }

    pub fn infer(&mut self, state: &[f64]) -> usize {
        self.act(state, false)
    }

    pub fn remember(&mut self, record: ReplayRecord) {
        self.memory.push(record);
    }

    /// One-step Q-learning over a random minibatch, one sample at a time so
    /// later targets see earlier updates, then epsilon decay. Leaves
    /// everything untouched when no sample is drawn.
    pub fn replay(&mut self, batch_size: usize) {
        if batch_size == 0 {
            return;
        }
        let Some(batch) = self.memory.sample(&mut self.rng, batch_size) else {
            return;
        };

        let actions = self.action_count();
        for rec in batch {
            let s = self.row(&rec.state);
            let next = self.row(&rec.next_state);
            let action = rec.action.min(actions - 1);
            let target = if rec.done {
                rec.reward
            } else {
                rec.reward + self.config.gamma * max_value(&self.q_table[next])
            };
            let old = self.q_table[s][action];
            self.q_table[s][action] = old + self.config.learning_rate * (target - old);
        }

        if self.epsilon > self.config.epsilon_min {
            self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        }
    }

    /// Reset, then act/step/remember/replay until `max_steps` or the
    /// environment is done. Returns the summed reward.
    pub fn learn_episode(&mut self, env: &mut BacktestEnvironment, max_steps: usize, batch_size: usize) -> f64 {
        let mut state = env.reset();
        let instruments = env.instruments();
        let mut episode_reward = 0.0;

        for _ in 0..max_steps {
            let action = self.act(&state, true);
            let allocation = self.mapper.allocation(action, &instruments);
            let outcome = env.step(&allocation);
            if let Some(err) = &outcome.error {
                debug!(error = %err, "Environment refused step");
                break;
            }

            self.remember(ReplayRecord {
                state: state.clone(),
                action,
                reward: outcome.reward,
                next_state: outcome.state.clone(),
                done: outcome.done,
            });
            episode_reward += outcome.reward;
            state = outcome.state;

            self.replay(batch_size);

            if outcome.done {
                break;
            }
        }

        self.training_episodes += 1;
        self.episode_rewards.push(episode_reward);
        episode_reward
    }

    /// Runs episodes until done or cancelled; the token is checked between
    /// episodes. Returns the rewards of the episodes that ran.
    pub fn train(
        &mut self,
        env: &mut BacktestEnvironment,
        options: TrainOptions,
        cancel: Option<&CancellationToken>,
    ) -> Vec<f64> {
        let span = self.span.clone();
        let _guard = span.enter();
        let mut rewards = Vec::with_capacity(options.episodes);
        let every = options.eval_frequency.max(1);

        for episode in 0..options.episodes {
            if cancel.is_some_and(|t| t.is_cancelled()) {
                warn!(completed = episode, "Training cancelled");
                break;
            }

            let reward = self.learn_episode(env, options.max_steps, options.batch_size);
            rewards.push(reward);

            if (episode + 1) % every == 0 {
                let recent = &rewards[rewards.len().saturating_sub(every)..];
                info!(
                    "Episode {}/{} - Avg Reward: {:.4} - Epsilon: {:.4}",
                    episode + 1,
                    options.episodes,
                    mean(recent),
                    self.epsilon
                );
            }
        }

        rewards
    }

    pub fn stats(&self) -> Option<TrainingStats> {
        if self.episode_rewards.is_empty() {
            return None;
        }
        let r = &self.episode_rewards;
        Some(TrainingStats {
            total_episodes: self.training_episodes,
            mean_reward: mean(r),
            std_reward: population_std(r),
            max_reward: r.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min_reward: r.iter().copied().fold(f64::INFINITY, f64::min),
            epsilon: self.epsilon,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let snapshot = QTableFile {
            config: self.config.clone(),
            epsilon: self.epsilon,
            training_episodes: self.training_episodes,
            q_table: self.q_table.clone(),
        };
        serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)?;
        info!("Saved Q-table to {}", path.display());
        Ok(())
    }

    /// Restores a saved Q-table and exploration rate. The table shape must
    /// match this agent's discretizer and action count.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let snapshot: QTableFile = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", path.display()))?;

        let rows = self.q_table.len();
        let cols = self.action_count();
        if snapshot.q_table.len() != rows || snapshot.q_table.iter().any(|r| r.len() != cols) {
            anyhow::bail!(
                "Q-table in {} does not match a {}x{} agent",
                path.display(),
                rows,
                cols
            );
        }

        self.q_table = snapshot.q_table;
        self.epsilon = snapshot.epsilon;
        self.training_episodes = snapshot.training_episodes;
        Ok(())
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

fn max_value(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

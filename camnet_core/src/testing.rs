//! Test doubles for the environment contracts.

use camnet_env::{Features, Message, MessageKind, RandomSource, RandomUse, Transport};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;

/// Random source returning scripted uniform draws, then seeded ones.
pub struct ScriptedSource {
    draws: VecDeque<f64>,
    rng: ChaCha8Rng,
    pub consumed: Vec<RandomUse>,
}

impl ScriptedSource {
    pub fn new(draws: Vec<f64>) -> Self {
        Self {
            draws: draws.into(),
            rng: ChaCha8Rng::seed_from_u64(1),
            consumed: Vec::new(),
        }
    }
}

impl RandomSource for ScriptedSource {
    fn stream(&mut self, _purpose: RandomUse) -> &mut dyn RngCore {
        &mut self.rng
    }

    fn seed(&self) -> u64 {
        1
    }

    fn next_f64(&mut self, purpose: RandomUse) -> f64 {
        self.consumed.push(purpose);
        match self.draws.pop_front() {
            Some(d) => d,
            None => rand::Rng::gen(&mut self.rng),
        }
    }
}

/// Transport that records every message and delivers nothing.
pub struct RecordingTransport {
    name: String,
    neighbours: Vec<String>,
    delayed: bool,
    pub sent: Vec<Message>,
}

impl RecordingTransport {
    pub fn new(name: &str, neighbours: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            neighbours: neighbours.iter().map(|n| n.to_string()).collect(),
            delayed: false,
            sent: Vec::new(),
        }
    }

    /// Reports accepted messages as queued.
    pub fn delayed(mut self) -> Self {
        self.delayed = true;
        self
    }

    /// Recipients of messages of `kind`, in send order.
    pub fn recipients(&self, kind: MessageKind) -> Vec<String> {
        self.sent.iter().filter(|m| m.kind == kind).map(|m| m.to.clone()).collect()
    }
}

impl Transport for RecordingTransport {
    fn local_name(&self) -> &str {
        &self.name
    }

    fn neighbours(&self) -> Vec<String> {
        self.neighbours.clone()
    }

    fn send(&mut self, to: &str, kind: MessageKind, payload: Option<&Features>) -> Option<Message> {
        let msg = Message::new(self.name.clone(), to, kind, payload.cloned());
        self.send_message(msg)
    }

    fn send_message(&mut self, message: Message) -> Option<Message> {
        if !self.neighbours.contains(&message.to) {
            return Some(Message::bad_destination(self.name.clone(), message.to, message.payload));
        }
        self.sent.push(message);
        None
    }

    fn is_delayed(&self) -> bool {
        self.delayed
    }
}

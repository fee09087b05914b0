use compact_str::CompactString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Disconnected,
    Connecting,
    Connected,
}

/// A connection attempt the adapter should start. `generation` identifies the
/// attempt in later `on_connected`/`on_disconnected` reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub generation: u64,
    pub index: usize,
    pub addr: CompactString,
}

/// Rotates connection attempts through the known brokers, one at a time.
///
/// The candidate list starts with the static broker and may grow by exactly one
/// discovered address. Reports from superseded attempts are ignored.
#[derive(Debug)]
pub struct Failover {
    candidates: Vec<CompactString>,
    index: usize,
    state: BrokerState,
    discovered: bool,
    generation: u64,
}

impl Failover {
    pub fn new(static_broker: impl Into<CompactString>) -> Self {
        Self {
            candidates: vec![static_broker.into()],
            index: 0,
            state: BrokerState::Disconnected,
            discovered: false,
            generation: 0,
        }
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn candidates(&self) -> &[CompactString] {
        &self.candidates
    }

    /// Appends the discovered broker. Only the first call has an effect.
    pub fn add_discovered(&mut self, addr: impl Into<CompactString>) -> bool {
        if self.discovered {
            return false;
        }

        self.discovered = true;
        self.candidates.push(addr.into());
        true
    }

    /// First attempt, against the current candidate.
    pub fn start(&mut self) -> Attempt {
        self.attempt()
    }

    /// Periodic check. Advances to the next candidate unless an attempt is in
    /// flight or a session is up.
    pub fn tick(&mut self) -> Option<Attempt> {
        match self.state {
            BrokerState::Connecting | BrokerState::Connected => None,
            BrokerState::Disconnected => {
                self.index = (self.index + 1) % self.candidates.len();
                Some(self.attempt())
            }
        }
    }

    fn attempt(&mut self) -> Attempt {
        self.generation += 1;
        self.state = BrokerState::Connecting;

        Attempt {
            generation: self.generation,
            index: self.index,
            addr: self.candidates[self.index].clone(),
        }
    }

    pub fn on_connected(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != BrokerState::Connecting {
            return false;
        }

        self.state = BrokerState::Connected;
        true
    }

    pub fn on_disconnected(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }

        self.state = BrokerState::Disconnected;
        true
    }
}

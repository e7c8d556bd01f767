use super::{AgentService, RegistrationState, Registrar, RegistryError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Hang,
}

/// In-memory registrar that counts calls and follows a scripted behavior.
pub struct FakeRegistrar {
    pub register_behavior: Behavior,
    pub deregister_behavior: Behavior,
    pub healthy: bool,
    pub register_calls: AtomicUsize,
    pub deregister_calls: AtomicUsize,
    state: Mutex<RegistrationState>,
}

impl FakeRegistrar {
    pub fn new() -> Self {
        Self {
            register_behavior: Behavior::Succeed,
            deregister_behavior: Behavior::Succeed,
            healthy: true,
            register_calls: AtomicUsize::new(0),
            deregister_calls: AtomicUsize::new(0),
            state: Mutex::new(RegistrationState::Unregistered),
        }
    }

    pub fn with_register(mut self, behavior: Behavior) -> Self {
        self.register_behavior = behavior;
        self
    }

    pub fn with_deregister(mut self, behavior: Behavior) -> Self {
        self.deregister_behavior = behavior;
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn registers(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn deregisters(&self) -> usize {
        self.deregister_calls.load(Ordering::SeqCst)
    }

    fn current(&self) -> RegistrationState {
        *self.state.lock().unwrap()
    }

    fn set(&self, state: RegistrationState) {
        *self.state.lock().unwrap() = state;
    }
}

async fn act(behavior: Behavior, operation: &'static str) -> Result<(), RegistryError> {
    match behavior {
        Behavior::Succeed => Ok(()),
        Behavior::Fail => Err(RegistryError::Rejected {
            operation,
            status: 500,
            body: "scripted failure".to_string(),
        }),
        Behavior::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }
}

#[async_trait]
impl Registrar for FakeRegistrar {
    fn identity(&self) -> &str {
        "fake-127.0.0.1-8080"
    }

    async fn state(&self) -> RegistrationState {
        self.current()
    }

    async fn register(&self) -> Result<(), RegistryError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        act(self.register_behavior, "register").await?;
        self.set(RegistrationState::Registered);
        Ok(())
    }

    async fn deregister(&self) -> Result<(), RegistryError> {
        self.deregister_calls.fetch_add(1, Ordering::SeqCst);
        if self.current() != RegistrationState::Registered {
            return Err(RegistryError::NotRegistered(self.identity().to_string()));
        }
        act(self.deregister_behavior, "deregister").await?;
        self.set(RegistrationState::Deregistered);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.healthy
    }

    async fn lookup(&self) -> Result<AgentService, RegistryError> {
        if self.current() != RegistrationState::Registered {
            return Err(RegistryError::NotFound(self.identity().to_string()));
        }
        Ok(AgentService {
            id: self.identity().to_string(),
            service: "fake".to_string(),
            address: "127.0.0.1".to_string(),
            port: 8080,
            tags: None,
            meta: None,
        })
    }
}

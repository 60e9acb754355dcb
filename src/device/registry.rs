use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{DeviceScope, DeviceState};

/// Разделяемая ссылка на запись устройства.
pub type DeviceHandle = Arc<Mutex<DeviceState>>;

/// Реестр записей устройств.
///
/// При [`DeviceScope::Shared`] все сессии получают одну и ту же запись.
/// При [`DeviceScope::PerSession`] записи создаются лениво по
/// идентификатору сессии с начальным состоянием.
pub struct DeviceRegistry {
    scope: DeviceScope,
    shared: DeviceHandle,
    sessions: DashMap<String, DeviceHandle>,
}

impl DeviceRegistry {
    pub fn new(scope: DeviceScope) -> Self {
        Self {
            scope,
            shared: Arc::new(Mutex::new(DeviceState::default())),
            sessions: DashMap::new(),
        }
    }

    pub fn scope(&self) -> DeviceScope {
        self.scope
    }

    /// Возвращает запись устройства для сессии, создавая её при
    /// необходимости.
    pub fn device(
        &self,
        session_id: &str,
    ) -> DeviceHandle {
        match self.scope {
            DeviceScope::Shared => self.shared.clone(),
            DeviceScope::PerSession => {
                if let Some(handle) = self.sessions.get(session_id) {
                    return handle.clone();
                }
                self.sessions
                    .entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(DeviceState::default())))
                    .clone()
            }
        }
    }

    /// Копия текущего состояния устройства сессии.
    ///
    /// Для ещё не созданной записи возвращает начальное состояние, не
    /// создавая её.
    pub fn snapshot(
        &self,
        session_id: &str,
    ) -> DeviceState {
        match self.scope {
            DeviceScope::Shared => self.shared.lock().clone(),
            DeviceScope::PerSession => self
                .sessions
                .get(session_id)
                .map(|handle| handle.lock().clone())
                .unwrap_or_default(),
        }
    }

    /// Удаляет запись сессии. Для общего устройства ничего не делает.
    pub fn forget(
        &self,
        session_id: &str,
    ) -> bool {
        match self.scope {
            DeviceScope::Shared => false,
            DeviceScope::PerSession => self.sessions.remove(session_id).is_some(),
        }
    }

    /// Количество записей, созданных для отдельных сессий.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DeviceScope::default())
    }
}

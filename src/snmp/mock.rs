//! Сессия-заглушка для тестов: заранее заданные ответы и/или таблица агента.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::oid::{compare_oids, trim_oid};
use super::session::{
    ERROR_STATUS_NO_SUCH_NAME, PduValue, Session, SessionFactory, SessionOptions, SnmpPacket,
    SnmpVersion, Varbind,
};
use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MockRequest {
    Get(Vec<String>),
    GetNext(Vec<String>),
    GetBulk(Vec<String>, u32),
}

impl MockRequest {
    pub fn get(oids: &[&str]) -> Self {
        Self::Get(oids.iter().map(|s| s.to_string()).collect())
    }

    pub fn get_next(oids: &[&str]) -> Self {
        Self::GetNext(oids.iter().map(|s| s.to_string()).collect())
    }

    pub fn get_bulk(oids: &[&str], max_repetitions: u32) -> Self {
        Self::GetBulk(oids.iter().map(|s| s.to_string()).collect(), max_repetitions)
    }
}

#[derive(Default)]
struct MockState {
    expectations: HashMap<MockRequest, Result<SnmpPacket, String>>,
    agent: Vec<(String, PduValue)>,
    calls: Vec<MockRequest>,
    closed: bool,
}

/// Сессия, отвечающая по сценарию. Клоны разделяют состояние.
#[derive(Clone)]
pub struct MockSession {
    version: SnmpVersion,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new(SnmpVersion::V2c)
    }
}

impl MockSession {
    pub fn new(version: SnmpVersion) -> Self {
        Self {
            version,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn on(&self, request: MockRequest, response: SnmpPacket) -> &Self {
        self.state().expectations.insert(request, Ok(response));
        self
    }

    pub fn on_error(&self, request: MockRequest, error: &str) -> &Self {
        self.state()
            .expectations
            .insert(request, Err(error.to_string()));
        self
    }

    /// Добавляет значение в таблицу агента; она отвечает на запросы без сценария.
    pub fn set_agent_value(&self, oid: &str, value: PduValue) -> &Self {
        let oid = trim_oid(oid).to_string();
        let mut state = self.state();
        state.agent.retain(|(o, _)| o != &oid);
        state.agent.push((oid, value));
        state.agent.sort_by(|a, b| compare_oids(&a.0, &b.0));
        self
    }

    pub fn calls(&self) -> Vec<MockRequest> {
        self.state().calls.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    async fn respond(&self, request: MockRequest) -> Result<SnmpPacket, SessionError> {
        let mut state = self.state();
        state.calls.push(request.clone());

        if let Some(scripted) = state.expectations.get(&request) {
            return scripted.clone().map_err(SessionError::Transport);
        }

        if state.agent.is_empty() {
            return Err(SessionError::Transport(format!(
                "unexpected request {:?}",
                request
            )));
        }

        Ok(match &request {
            MockRequest::Get(oids) => agent_get(&state.agent, oids, self.version),
            MockRequest::GetNext(oids) => SnmpPacket::with_variables(
                oids.iter().map(|oid| agent_next(&state.agent, oid)).collect(),
            ),
            MockRequest::GetBulk(oids, max_repetitions) => {
                let mut frontier: Vec<String> =
                    oids.iter().map(|o| trim_oid(o).to_string()).collect();
                let mut variables = Vec::new();
                for _ in 0..*max_repetitions {
                    for current in frontier.iter_mut() {
                        let varbind = agent_next(&state.agent, current);
                        *current = varbind.oid.clone();
                        variables.push(varbind);
                    }
                }
                SnmpPacket::with_variables(variables)
            }
        })
    }
}

fn agent_get(agent: &[(String, PduValue)], oids: &[String], version: SnmpVersion) -> SnmpPacket {
    let mut variables = Vec::with_capacity(oids.len());
    for (i, oid) in oids.iter().enumerate() {
        match agent.iter().find(|(o, _)| o == trim_oid(oid)) {
            Some((o, value)) => variables.push(Varbind::new(o.clone(), value.clone())),
            None if version == SnmpVersion::V1 => {
                return SnmpPacket {
                    error_status: ERROR_STATUS_NO_SUCH_NAME,
                    error_index: (i + 1) as u32,
                    variables: oids
                        .iter()
                        .map(|o| Varbind::new(o.clone(), PduValue::Null))
                        .collect(),
                };
            }
            None => variables.push(Varbind::new(oid.clone(), PduValue::NoSuchObject)),
        }
    }
    SnmpPacket::with_variables(variables)
}

fn agent_next(agent: &[(String, PduValue)], oid: &str) -> Varbind {
    agent
        .iter()
        .find(|(o, _)| compare_oids(o, oid).is_gt())
        .map(|(o, v)| Varbind::new(o.clone(), v.clone()))
        .unwrap_or_else(|| Varbind::new(trim_oid(oid), PduValue::EndOfMibView))
}

#[async_trait]
impl Session for MockSession {
    async fn get(&mut self, oids: &[String]) -> Result<SnmpPacket, SessionError> {
        self.respond(MockRequest::Get(oids.to_vec())).await
    }

    async fn get_next(&mut self, oids: &[String]) -> Result<SnmpPacket, SessionError> {
        self.respond(MockRequest::GetNext(oids.to_vec())).await
    }

    async fn get_bulk(
        &mut self,
        oids: &[String],
        max_repetitions: u32,
    ) -> Result<SnmpPacket, SessionError> {
        self.respond(MockRequest::GetBulk(oids.to_vec(), max_repetitions))
            .await
    }

    fn version(&self) -> SnmpVersion {
        self.version
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.state().closed = true;
        Ok(())
    }
}

/// Фабрика, выдающая заранее подготовленные сессии по IP.
#[derive(Clone, Default)]
pub struct MockSessionFactory {
    sessions: Arc<Mutex<HashMap<String, MockSession>>>,
    connects: Arc<Mutex<Vec<String>>>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ip: &str, session: MockSession) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ip.to_string(), session);
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn connect(&self, options: &SessionOptions) -> Result<Box<dyn Session>, SessionError> {
        self.connects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(options.ip.clone());

        let session = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&options.ip)
            .cloned();

        match session {
            Some(session) => Ok(Box::new(session)),
            None => Err(SessionError::Transport(format!(
                "no route to host {}",
                options.ip
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn agent_answers_bulk_in_repetition_order() {
        let mock = MockSession::default();
        mock.set_agent_value("1.1.1.1", PduValue::Integer(11))
            .set_agent_value("1.1.1.2", PduValue::Integer(12))
            .set_agent_value("1.1.2.1", PduValue::Integer(21));

        let mut session = mock.clone();
        let packet = session
            .get_bulk(&["1.1.1".to_string(), "1.1.2".to_string()], 2)
            .await
            .unwrap();

        let oids: Vec<&str> = packet.variables.iter().map(|v| v.oid.as_str()).collect();
        assert_eq!(oids, vec!["1.1.1.1", "1.1.2.1", "1.1.1.2", "1.1.2.1"]);
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn v1_agent_reports_no_such_name() {
        let mock = MockSession::new(SnmpVersion::V1);
        mock.set_agent_value("1.1.1.0", PduValue::Integer(1));

        let mut session = mock.clone();
        let packet = session
            .get(&["1.1.1.0".to_string(), "1.1.2.0".to_string()])
            .await
            .unwrap();
        assert_eq!(packet.error_status, ERROR_STATUS_NO_SUCH_NAME);
        assert_eq!(packet.error_index, 2);
    }

    #[tokio::test]
    async fn unexpected_request_is_an_error() {
        let mut session = MockSession::default();
        let err = session.get(&["1.2.3".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("unexpected request"));
    }
}

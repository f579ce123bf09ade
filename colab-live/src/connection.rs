//! Connections: one entry per live socket attached to a list.

use colab_core::{ListId, UserId};
use uuid::Uuid;

/// Identity of one attached connection.
pub type ConnectionId = Uuid;

/// Opaque identity of the transport (socket) a connection rides on.
/// Equality is the only operation the coordinator needs.
pub type TransportId = Uuid;

/// Binding of a transport to a list on behalf of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub list_id: ListId,
    pub user_id: UserId,
    pub transport: TransportId,
}

impl Connection {
    pub fn new(list_id: ListId, user_id: UserId, transport: TransportId) -> Self {
        Self {
            id: Uuid::new_v4(),
            list_id,
            user_id,
            transport,
        }
    }
}

/// Connections currently attached to one session.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Vec<Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    /// Remove every connection riding on `transport`.
    pub fn remove_by_transport(&mut self, transport: TransportId) -> Vec<Connection> {
        let mut removed = Vec::new();
        self.connections.retain(|c| {
            if c.transport == transport {
                removed.push(c.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn count_for_user(&self, user_id: UserId) -> usize {
        self.connections
            .iter()
            .filter(|c| c.user_id == user_id)
            .count()
    }

    pub fn all(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_unique() {
        let transport = Uuid::new_v4();
        let a = Connection::new(1, 1, transport);
        let b = Connection::new(1, 1, transport);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_remove_by_transport() {
        let mut registry = ConnectionRegistry::new();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        registry.add(Connection::new(1, 10, t1));
        registry.add(Connection::new(1, 11, t2));

        let removed = registry.remove_by_transport(t1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].user_id, 10);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.all()[0].transport, t2);

        assert!(registry.remove_by_transport(t1).is_empty());
    }

    #[test]
    fn test_count_for_user() {
        let mut registry = ConnectionRegistry::new();
        registry.add(Connection::new(1, 10, Uuid::new_v4()));
        registry.add(Connection::new(1, 10, Uuid::new_v4()));
        registry.add(Connection::new(1, 11, Uuid::new_v4()));

        assert_eq!(registry.count_for_user(10), 2);
        assert_eq!(registry.count_for_user(11), 1);
        assert_eq!(registry.count_for_user(12), 0);
        assert!(!registry.is_empty());
    }
}

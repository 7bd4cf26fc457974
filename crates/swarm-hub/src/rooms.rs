//! Socket-to-room bookkeeping. A connection sits in at most one agent room.
//! Connections without a room, and connections that asserted the dashboard
//! stream, form the unscoped stream.

use std::collections::{BTreeSet, HashMap};

/// Where an outbound event may be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Every connected socket, scoped or not.
    All,
    /// Unscoped sockets plus the rooms of the listed agents.
    Scoped(Vec<String>),
}

impl Route {
    pub fn unscoped() -> Self {
        Route::Scoped(Vec::new())
    }

    pub fn agent(agent_id: &str) -> Self {
        Route::Scoped(vec![agent_id.to_string()])
    }
}

#[derive(Debug, Default)]
pub struct RoomMembership {
    by_conn: HashMap<String, String>,
    by_room: HashMap<String, BTreeSet<String>>,
    dashboards: BTreeSet<String>,
}

impl RoomMembership {
    /// Move `conn_id` into the room of `agent_id`, returning the room it left.
    pub fn join(&mut self, conn_id: &str, agent_id: &str) -> Option<String> {
        let previous = self.leave(conn_id);
        self.by_conn
            .insert(conn_id.to_string(), agent_id.to_string());
        self.by_room
            .entry(agent_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
        previous
    }

    pub fn leave(&mut self, conn_id: &str) -> Option<String> {
        let room = self.by_conn.remove(conn_id)?;
        if let Some(members) = self.by_room.get_mut(&room) {
            members.remove(conn_id);
            if members.is_empty() {
                self.by_room.remove(&room);
            }
        }
        Some(room)
    }

    /// Keep `conn_id` on the unscoped stream regardless of its room.
    pub fn set_dashboard(&mut self, conn_id: &str, enabled: bool) {
        if enabled {
            self.dashboards.insert(conn_id.to_string());
        } else {
            self.dashboards.remove(conn_id);
        }
    }

    /// Drop every trace of a closed connection. Returns the room it was in.
    pub fn forget(&mut self, conn_id: &str) -> Option<String> {
        self.dashboards.remove(conn_id);
        self.leave(conn_id)
    }

    pub fn room_of(&self, conn_id: &str) -> Option<&str> {
        self.by_conn.get(conn_id).map(String::as_str)
    }

    fn is_unscoped(&self, conn_id: &str) -> bool {
        self.dashboards.contains(conn_id) || !self.by_conn.contains_key(conn_id)
    }

    #[cfg(test)]
    fn members(&self, agent_id: &str) -> Vec<String> {
        self.by_room
            .get(agent_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn room_count(&self) -> usize {
        self.by_room.len()
    }

    /// Resolve a route against the currently connected sockets.
    pub fn targets<'a, I>(&self, route: &Route, connected: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = BTreeSet::new();
        match route {
            Route::All => {
                out.extend(connected.into_iter().map(str::to_string));
            }
            Route::Scoped(agent_ids) => {
                for conn_id in connected {
                    let reached = self.is_unscoped(conn_id)
                        || self
                            .room_of(conn_id)
                            .is_some_and(|room| agent_ids.iter().any(|id| id == room));
                    if reached {
                        out.insert(conn_id.to_string());
                    }
                }
            }
        }
        out.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECTED: [&str; 4] = ["conn-1", "conn-2", "conn-3", "conn-4"];

    fn membership() -> RoomMembership {
        let mut rooms = RoomMembership::default();
        rooms.join("conn-2", "agent-a");
        rooms.join("conn-3", "agent-b");
        rooms.join("conn-4", "agent-a");
        rooms
    }

    #[test]
    fn joining_a_second_room_moves_the_socket() {
        let mut rooms = membership();
        let previous = rooms.join("conn-3", "agent-a");
        assert_eq!(previous.as_deref(), Some("agent-b"));
        assert_eq!(rooms.room_of("conn-3"), Some("agent-a"));
        assert_eq!(rooms.members("agent-b"), Vec::<String>::new());
        assert_eq!(rooms.room_count(), 1);
    }

    #[test]
    fn leave_drops_empty_rooms() {
        let mut rooms = membership();
        assert_eq!(rooms.leave("conn-3").as_deref(), Some("agent-b"));
        assert_eq!(rooms.leave("conn-3"), None);
        assert_eq!(rooms.room_count(), 1);
    }

    #[test]
    fn scoped_route_reaches_unscoped_and_matching_rooms_only() {
        let rooms = membership();
        let targets = rooms.targets(&Route::agent("agent-a"), CONNECTED);
        assert_eq!(targets, vec!["conn-1", "conn-2", "conn-4"]);
    }

    #[test]
    fn unscoped_route_reaches_dashboards_only() {
        let rooms = membership();
        assert_eq!(rooms.targets(&Route::unscoped(), CONNECTED), vec!["conn-1"]);
    }

    #[test]
    fn all_route_reaches_everyone() {
        let rooms = membership();
        assert_eq!(rooms.targets(&Route::All, CONNECTED).len(), 4);
    }

    #[test]
    fn dashboard_sockets_in_a_room_keep_the_unscoped_stream() {
        let mut rooms = membership();
        rooms.set_dashboard("conn-3", true);
        assert_eq!(
            rooms.targets(&Route::unscoped(), CONNECTED),
            vec!["conn-1", "conn-3"]
        );
        assert_eq!(
            rooms.targets(&Route::agent("agent-a"), CONNECTED),
            vec!["conn-1", "conn-2", "conn-3", "conn-4"]
        );

        rooms.set_dashboard("conn-3", false);
        assert_eq!(rooms.targets(&Route::unscoped(), CONNECTED), vec!["conn-1"]);
    }

    #[test]
    fn forget_clears_room_and_dashboard_flag() {
        let mut rooms = membership();
        rooms.set_dashboard("conn-2", true);
        assert_eq!(rooms.forget("conn-2").as_deref(), Some("agent-a"));
        assert_eq!(rooms.members("agent-a"), vec!["conn-4".to_string()]);
        rooms.join("conn-2", "agent-b");
        assert_eq!(rooms.targets(&Route::unscoped(), CONNECTED), vec!["conn-1"]);
    }

    #[test]
    fn disconnected_members_are_not_targets() {
        let rooms = membership();
        let targets = rooms.targets(&Route::agent("agent-b"), ["conn-1", "conn-2"]);
        assert_eq!(targets, vec!["conn-1"]);
    }
}

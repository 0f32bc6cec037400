//! Connection registry and student roster.
//!
//! Connections are transient and allocated by the transport; students are
//! keyed by the persistent id their client chose. A rejoin under an existing
//! student id rebinds the row to the new connection instead of adding a
//! second one, which is what makes reconnects idempotent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, StudentId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// What the registry knows about one live connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub role: Role,
    /// Only set for students; cleared when the student is kicked or rebinds
    /// to another connection.
    pub student_id: Option<StudentId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub connection_id: ConnectionId,
    pub has_answered: bool,
    seq: u64,
}

/// Roster row as shown to teachers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: StudentId,
    pub name: String,
    pub has_answered: bool,
}

impl From<&Student> for RosterEntry {
    fn from(s: &Student) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            has_answered: s.has_answered,
        }
    }
}

/// Result of a student join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinOutcome {
    pub entry: RosterEntry,
    /// The student id already had a roster row.
    pub rejoined: bool,
    /// The connection the row was bound to before this join, if different.
    pub superseded: Option<ConnectionId>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Registration>,
    students: HashMap<StudentId, Student>,
    next_seq: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_teacher(&mut self, conn: ConnectionId) {
        self.unbind_student_of(&conn);
        let _ = self.connections.insert(
            conn,
            Registration {
                role: Role::Teacher,
                student_id: None,
            },
        );
    }

    /// Upsert the roster row for `student_id` and bind it to `conn`.
    pub fn join_student(
        &mut self,
        conn: ConnectionId,
        student_id: StudentId,
        name: String,
        has_answered: bool,
    ) -> JoinOutcome {
        // A connection that switches identity leaves its old row behind.
        if let Some(previous) = self.student_id_for(&conn).cloned() {
            if previous != student_id {
                self.unbind_student_of(&conn);
            }
        }

        let (rejoined, superseded) = match self.students.get_mut(&student_id) {
            Some(existing) => {
                let old_conn = std::mem::replace(&mut existing.connection_id, conn.clone());
                existing.name = name;
                existing.has_answered = has_answered;
                (true, (old_conn != conn).then_some(old_conn))
            }
            None => {
                self.next_seq += 1;
                let _ = self.students.insert(
                    student_id.clone(),
                    Student {
                        id: student_id.clone(),
                        name,
                        connection_id: conn.clone(),
                        has_answered,
                        seq: self.next_seq,
                    },
                );
                (false, None)
            }
        };

        if let Some(ref old_conn) = superseded {
            if let Some(reg) = self.connections.get_mut(old_conn) {
                reg.student_id = None;
            }
        }

        let _ = self.connections.insert(
            conn,
            Registration {
                role: Role::Student,
                student_id: Some(student_id.clone()),
            },
        );

        let entry = self
            .students
            .get(&student_id)
            .map(RosterEntry::from)
            .unwrap_or_else(|| RosterEntry {
                id: student_id,
                name: String::new(),
                has_answered,
            });

        JoinOutcome {
            entry,
            rejoined,
            superseded,
        }
    }

    /// Forget a connection. Returns the student whose row was removed, if the
    /// connection was that student's current one.
    pub fn disconnect(&mut self, conn: &ConnectionId) -> Option<Student> {
        let reg = self.connections.remove(conn)?;
        let student_id = reg.student_id?;
        let is_current = self
            .students
            .get(&student_id)
            .is_some_and(|s| &s.connection_id == conn);
        if is_current {
            self.students.remove(&student_id)
        } else {
            None
        }
    }

    /// Remove a student's roster row and unbind its connection. The
    /// connection itself stays registered.
    pub fn remove_student(&mut self, student_id: &StudentId) -> Option<Student> {
        let student = self.students.remove(student_id)?;
        if let Some(reg) = self.connections.get_mut(&student.connection_id) {
            if reg.student_id.as_ref() == Some(student_id) {
                reg.student_id = None;
            }
        }
        Some(student)
    }

    pub fn registration(&self, conn: &ConnectionId) -> Option<&Registration> {
        self.connections.get(conn)
    }

    pub fn is_teacher(&self, conn: &ConnectionId) -> bool {
        self.connections
            .get(conn)
            .is_some_and(|r| r.role == Role::Teacher)
    }

    pub fn student_id_for(&self, conn: &ConnectionId) -> Option<&StudentId> {
        self.connections.get(conn)?.student_id.as_ref()
    }

    pub fn student_for(&self, conn: &ConnectionId) -> Option<&Student> {
        let id = self.student_id_for(conn)?;
        self.students.get(id)
    }

    pub fn student(&self, id: &StudentId) -> Option<&Student> {
        self.students.get(id)
    }

    pub fn mark_answered(&mut self, id: &StudentId) {
        if let Some(s) = self.students.get_mut(id) {
            s.has_answered = true;
        }
    }

    /// New poll generation: nobody has answered yet.
    pub fn reset_answered(&mut self) {
        for s in self.students.values_mut() {
            s.has_answered = false;
        }
    }

    pub fn student_count(&self) -> usize {
        self.students.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Roster in join order.
    pub fn roster(&self) -> Vec<RosterEntry> {
        let mut students: Vec<&Student> = self.students.values().collect();
        students.sort_by_key(|s| s.seq);
        students.into_iter().map(RosterEntry::from).collect()
    }

    fn unbind_student_of(&mut self, conn: &ConnectionId) {
        let Some(reg) = self.connections.get_mut(conn) else {
            return;
        };
        let Some(student_id) = reg.student_id.take() else {
            return;
        };
        let owns_row = self
            .students
            .get(&student_id)
            .is_some_and(|s| &s.connection_id == conn);
        if owns_row {
            let _ = self.students.remove(&student_id);
        }
    }
}

//! Who is calling, and what they may do.

use boxoffice_types::{EventListing, UserId};
use serde::{Deserialize, Serialize};

/// Role of an authenticated caller, established upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Books, pays for and cancels their own bookings.
    Customer,
    /// Manages tiers of the events they organize.
    Organizer,
    /// Unrestricted.
    Admin,
}

/// Trusted identity of whoever invokes an engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Authenticated user.
    pub user_id: UserId,
    /// What the user is acting as.
    pub role: Role,
}

impl Caller {
    /// A customer acting for themselves.
    pub const fn customer(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Customer,
        }
    }

    /// An event organizer.
    pub const fn organizer(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Organizer,
        }
    }

    /// An administrator.
    pub const fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    /// Admins may act on any customer's bookings and payments.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins administer every event; organizers only their own.
    pub fn can_administer(&self, event: &EventListing) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Organizer => event.organizer_id == self.user_id,
            Role::Customer => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_types::EventId;
    use chrono::Utc;

    #[test]
    fn only_owning_organizer_or_admin_administers_event() {
        let organizer = UserId::generate();
        let event = EventListing {
            id: EventId::generate(),
            title: "Jazz Night".to_string(),
            starts_at: Utc::now(),
            organizer_id: organizer,
        };

        assert!(Caller::organizer(organizer).can_administer(&event));
        assert!(!Caller::organizer(UserId::generate()).can_administer(&event));
        assert!(Caller::admin(UserId::generate()).can_administer(&event));
        assert!(!Caller::customer(organizer).can_administer(&event));
    }
}

use tracing::info;

use crate::config::Config;
use crate::engine::{Engine, EngineError, FacilityInput};
use crate::model::{ClockTime, FacilityStatus, FacilityType, Role, TimeSlot, User};

struct SampleFacility {
    name: &'static str,
    kind: FacilityType,
    capacity: u32,
    location: &'static str,
    description: &'static str,
    amenities: &'static [&'static str],
    open: (u16, u16),
}

const SAMPLE_FACILITIES: &[SampleFacility] = &[
    SampleFacility {
        name: "Main Auditorium",
        kind: FacilityType::Auditorium,
        capacity: 300,
        location: "Academic Block A, Ground Floor",
        description: "Large auditorium with modern audio-visual equipment",
        amenities: &["Projector", "Sound System", "AC", "Stage Lighting"],
        open: (8, 20),
    },
    SampleFacility {
        name: "Computer Lab 1",
        kind: FacilityType::ComputerLab,
        capacity: 40,
        location: "IT Block, 2nd Floor",
        description: "Fully equipped computer lab with latest software",
        amenities: &["40 PCs", "Projector", "AC", "Whiteboard"],
        open: (9, 17),
    },
    SampleFacility {
        name: "Seminar Hall A",
        kind: FacilityType::SeminarHall,
        capacity: 80,
        location: "Academic Block B, 1st Floor",
        description: "Modern seminar hall for presentations and meetings",
        amenities: &["Projector", "AC", "Sound System", "Whiteboard"],
        open: (9, 18),
    },
    SampleFacility {
        name: "Physics Lab",
        kind: FacilityType::PhysicsLab,
        capacity: 30,
        location: "Science Block, 1st Floor",
        description: "Well-equipped physics laboratory",
        amenities: &["Lab Equipment", "Safety Gear", "Whiteboard"],
        open: (9, 17),
    },
    SampleFacility {
        name: "Sports Ground",
        kind: FacilityType::SportsGround,
        capacity: 100,
        location: "Campus Ground",
        description: "Multi-purpose sports ground",
        amenities: &["Football Posts", "Basketball Court", "Track"],
        open: (6, 18),
    },
];

fn hours((open, close): (u16, u16)) -> Result<TimeSlot, EngineError> {
    let start = ClockTime::from_hm(open, 0);
    let end = ClockTime::from_hm(close, 0);
    match (start, end) {
        (Some(start), Some(end)) => Ok(TimeSlot::try_new(start, end)?),
        _ => Err(EngineError::Internal(format!("bad sample hours {open}-{close}"))),
    }
}

/// Create the configured admin account unless that email already exists.
pub async fn ensure_admin(engine: &Engine, config: &Config) -> Result<Option<User>, EngineError> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(None);
    };
    if let Some(existing) = engine.user_by_email(email) {
        return Ok(Some(existing));
    }
    let admin = engine
        .register_user(crate::engine::NewUser {
            name: "System Admin".into(),
            email: email.clone(),
            password: password.clone(),
            contact: "1234567890".into(),
            department: "Administration".into(),
            role: Role::Admin,
        })
        .await?;
    info!(email = %admin.email, "bootstrap admin created");
    Ok(Some(admin))
}

/// Insert the sample facilities into an empty store. Returns how many were added.
pub async fn seed_facilities(engine: &Engine, created_by: ulid::Ulid) -> Result<usize, EngineError> {
    if !engine.facilities_by_name().is_empty() {
        info!("facilities already exist, skipping seed");
        return Ok(0);
    }
    for sample in SAMPLE_FACILITIES {
        engine
            .create_facility(
                created_by,
                FacilityInput {
                    name: sample.name.into(),
                    kind: sample.kind,
                    capacity: sample.capacity,
                    location: sample.location.into(),
                    description: sample.description.into(),
                    amenities: sample.amenities.iter().map(|a| a.to_string()).collect(),
                    hours: hours(sample.open)?,
                    status: FacilityStatus::Active,
                },
            )
            .await?;
    }
    info!(count = SAMPLE_FACILITIES.len(), "sample facilities seeded");
    Ok(SAMPLE_FACILITIES.len())
}

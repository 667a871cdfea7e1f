use crate::model::BookingDetails;

const USER_HEADER: [&str; 8] = [
    "Date",
    "Facility",
    "Type",
    "Location",
    "Start Time",
    "End Time",
    "Purpose",
    "Status",
];

fn row(details: &BookingDetails) -> [String; 8] {
    let b = &details.booking;
    let (kind, location) = details
        .facility
        .as_ref()
        .map_or(("", ""), |f| (f.kind.as_str(), f.location.as_str()));
    [
        b.date.to_string(),
        details.facility_name().to_string(),
        kind.to_string(),
        location.to_string(),
        b.slot.start.to_string(),
        b.slot.end.to_string(),
        b.purpose.clone(),
        b.status.to_string(),
    ]
}

/// CSV of one user's bookings.
pub fn user_bookings_csv(bookings: &[BookingDetails]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(USER_HEADER)?;
    for details in bookings {
        writer.write_record(row(details))?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}

/// CSV of every booking, with the booking user's name and email in front.
pub fn all_bookings_csv(bookings: &[BookingDetails]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["User", "Email"].into_iter().chain(USER_HEADER))?;
    for details in bookings {
        let (name, email) = details
            .user
            .as_ref()
            .map_or(("Deleted user", ""), |u| (u.name.as_str(), u.email.as_str()));
        let fields = row(details);
        writer.write_record([name, email].into_iter().chain(fields.iter().map(String::as_str)))?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_LOCATION_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_PURPOSE_LEN: usize = 1000;
pub const MAX_SUBJECT_LEN: usize = 200;
pub const MAX_COMPLAINT_LEN: usize = 5000;
pub const MAX_RESPONSE_LEN: usize = 5000;
pub const MAX_AMENITIES: usize = 32;
pub const MAX_AMENITY_LEN: usize = 64;
pub const MAX_NOTIFICATION_TITLE_LEN: usize = 200;
pub const MAX_NOTIFICATION_MESSAGE_LEN: usize = 2000;
pub const MAX_FACILITY_CAPACITY: u32 = 100_000;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 256;

pub const FIRST_FACILITY_NUMBER: u32 = 1;
pub const FIRST_USER_NUMBER: u32 = 1001;
pub const FIRST_COMPLAINT_NUMBER: u32 = 1001;

pub const MAX_SEARCH_RESULTS: usize = 20;
pub const NOTIFICATIONS_PER_PAGE: usize = 10;
pub const RECENT_NOTIFICATIONS: usize = 10;
pub const USER_DASHBOARD_RECENT: usize = 5;
pub const ADMIN_DASHBOARD_RECENT: usize = 10;

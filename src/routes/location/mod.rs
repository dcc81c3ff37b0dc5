mod handler;
pub mod model;

pub use handler::{
    activate_location,
    active_locations,
    create_location,
    delete_location,
    list_locations,
    update_location,
};

pub mod handlers;
pub mod html;
pub mod jobs;
pub mod keyboards;
pub mod staff;
pub mod survey;

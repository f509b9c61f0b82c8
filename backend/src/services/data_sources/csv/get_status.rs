use crate::job_controller::state::JobsState;
use crate::services::response;
use actix_web::{web, Responder};

pub(crate) async fn process(job_id: web::Path<String>, state: web::Data<JobsState>) -> impl Responder {
    match state.get(&job_id).await {
        Some(status) => response::ok("Job found", status),
        None => response::not_found("Job ID not found"),
    }
}

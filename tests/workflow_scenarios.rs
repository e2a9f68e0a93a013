//! End-to-end workflow runs against the in-memory store

mod common;

use common::*;
use rust_decimal::Decimal;
use serviceman_backend::domain::*;
use serviceman_backend::services::paystack::GatewayStatus;
use serviceman_backend::store::{PageWindow, RequestFilter, RequestScope, WorkflowStore};
use serviceman_backend::workflow::{Actor, WorkflowError};

fn serviceman_actor(account: &UserAccount) -> Actor {
    Actor::user(account.id, UserRole::Serviceman)
}

async fn active_jobs(h: &Harness, serviceman_id: uuid::Uuid) -> u64 {
    let filter = RequestFilter {
        scope: RequestScope::Serviceman(serviceman_id),
        status: Some(ServiceRequestStatus::InProgress),
    };
    h.store
        .list_requests(filter, PageWindow { limit: 100, offset: 0 })
        .await
        .unwrap()
        .1
}

/// Estimate and final cost are present exactly from the stage that sets them
fn assert_pricing_matches_stage(r: &ServiceRequest) {
    assert_eq!(
        r.serviceman_estimated_cost.is_some(),
        r.status.has_reached(ServiceRequestStatus::EstimationSubmitted),
        "estimate presence at {}",
        r.status
    );
    assert_eq!(
        r.final_cost.is_some(),
        r.status.has_reached(ServiceRequestStatus::AwaitingClientApproval),
        "final cost presence at {}",
        r.status
    );
}

#[tokio::test]
async fn full_lifecycle_from_booking_to_review() {
    let h = Harness::new();
    let x = h.add_serviceman("Xavier Plumber", Decimal::new(400, 2), 2);
    let admin = h.admin_actor();

    let reference = h.pay_booking_fee(false).await;
    let created = h
        .workflow
        .create_request(&h.client_actor(), h.booking(reference.clone(), false))
        .await
        .unwrap()
        .service_request;
    assert_eq!(created.status, ServiceRequestStatus::PendingAdminAssignment);
    assert_eq!(created.initial_booking_fee, Decimal::from(2000));
    assert!(!created.auto_flagged_emergency);
    assert_pricing_matches_stage(&created);

    let payment = h.store.get_payment(&reference).await.unwrap().unwrap();
    assert_eq!(payment.service_request_id, Some(created.id));

    let assigned = h
        .workflow
        .assign_serviceman(
            &admin,
            created.id,
            AssignServicemanInput {
                serviceman_id: x.id,
                backup_serviceman_id: None,
                notes: Some("Closest approved plumber".to_string()),
            },
        )
        .await
        .unwrap()
        .service_request;
    assert_eq!(assigned.status, ServiceRequestStatus::PendingEstimation);
    assert_eq!(assigned.serviceman_id, Some(x.id));
    assert_pricing_matches_stage(&assigned);

    let estimated = h
        .workflow
        .submit_estimate(
            &serviceman_actor(&x),
            created.id,
            SubmitEstimateInput {
                estimated_cost: Decimal::from(10000),
                notes: None,
            },
        )
        .await
        .unwrap()
        .service_request;
    assert_eq!(estimated.status, ServiceRequestStatus::EstimationSubmitted);
    assert!(estimated.inspection_completed_at.is_some());
    assert_eq!(estimated.final_cost, None);
    assert_pricing_matches_stage(&estimated);

    let finalized = h
        .workflow
        .finalize_price(&admin, created.id, FinalizePriceInput::default())
        .await
        .unwrap();
    assert_eq!(finalized.service_request.status, ServiceRequestStatus::AwaitingClientApproval);
    assert_eq!(finalized.service_request.final_cost, Some(Decimal::new(1100000, 2)));
    let pricing = finalized.pricing_breakdown.unwrap();
    assert_eq!(pricing.platform_fee, Decimal::from(1000));
    assert_pricing_matches_stage(&finalized.service_request);

    let init = h
        .payments
        .initialize_service_payment(
            &h.client,
            ServicePaymentInput {
                service_request_id: created.id,
            },
        )
        .await
        .unwrap();
    assert_eq!(init.amount, Decimal::new(1100000, 2));
    let verified = h.payments.verify(&h.client, &init.reference).await.unwrap();
    assert_eq!(verified.status, PaymentStatus::Successful);
    assert_eq!(verified.service_request_status.as_deref(), Some("PAYMENT_COMPLETED"));
    assert_pricing_matches_stage(&h.store.get_request(created.id).await.unwrap().unwrap());

    let history = h.history(created.id).await;
    let automated = &history[0];
    assert_eq!(automated.new_status, ServiceRequestStatus::PaymentCompleted);
    assert!(automated.is_automated);
    assert_eq!(automated.changed_by, None);

    let in_progress = h
        .workflow
        .authorize_work(&admin, created.id, AuthorizeWorkInput::default())
        .await
        .unwrap()
        .service_request;
    assert_eq!(in_progress.status, ServiceRequestStatus::InProgress);
    assert_pricing_matches_stage(&in_progress);
    assert!(!h.profile(x.id).await.is_available);

    let completed = h
        .workflow
        .complete_job(
            &serviceman_actor(&x),
            created.id,
            CompleteJobInput {
                completion_notes: Some("Replaced trap and seal".to_string()),
            },
        )
        .await
        .unwrap()
        .service_request;
    assert_eq!(completed.status, ServiceRequestStatus::Completed);
    assert!(completed.work_completed_at.is_some());
    assert_pricing_matches_stage(&completed);
    let profile = h.profile(x.id).await;
    assert_eq!(profile.total_jobs_completed, 3);
    assert!(profile.is_available);

    let history_len = h.history(created.id).await.len();
    let confirmed = h
        .workflow
        .confirm_completion(&admin, created.id, ConfirmCompletionInput::default())
        .await
        .unwrap()
        .service_request;
    assert_eq!(confirmed.status, ServiceRequestStatus::Completed);
    assert_pricing_matches_stage(&confirmed);
    assert_eq!(h.history(created.id).await.len(), history_len);

    let reviewed = h
        .workflow
        .submit_review(
            &h.client_actor(),
            created.id,
            SubmitReviewInput {
                rating: 5,
                review: Some("Quick and tidy".to_string()),
            },
        )
        .await
        .unwrap()
        .service_request;
    assert_eq!(reviewed.status, ServiceRequestStatus::ClientReviewed);
    assert_pricing_matches_stage(&reviewed);

    // (4.00 * 2 + 5) / 3
    assert_eq!(h.profile(x.id).await.rating, Decimal::new(433, 2));

    let statuses: Vec<_> = h
        .history(created.id)
        .await
        .into_iter()
        .rev()
        .map(|entry| entry.new_status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            ServiceRequestStatus::PendingAdminAssignment,
            ServiceRequestStatus::PendingEstimation,
            ServiceRequestStatus::EstimationSubmitted,
            ServiceRequestStatus::AwaitingClientApproval,
            ServiceRequestStatus::PaymentCompleted,
            ServiceRequestStatus::InProgress,
            ServiceRequestStatus::Completed,
            ServiceRequestStatus::ClientReviewed,
        ]
    );

    let review_alerts = h.notifications_for(x.id).await;
    assert!(review_alerts
        .iter()
        .any(|n| n.notification_type == NotificationType::ReviewReceived && n.title == "New Review - 5 stars"));
}

#[tokio::test]
async fn emergency_booking_with_normal_fee_is_rejected() {
    let h = Harness::new();
    let reference = h.pay_booking_fee(false).await;

    let err = h
        .workflow
        .create_request(&h.client_actor(), h.booking(reference.clone(), true))
        .await
        .unwrap_err();

    match err {
        WorkflowError::PaymentValidation { expected, actual, .. } => {
            assert_eq!(expected, Some(Decimal::from(5000)));
            assert_eq!(actual, Some(Decimal::from(2000)));
        }
        other => panic!("expected payment validation error, got {:?}", other),
    }

    let (requests, total) = h
        .workflow
        .list_requests(&h.admin_actor(), None, PageWindow { limit: 10, offset: 0 })
        .await
        .unwrap();
    assert!(requests.is_empty());
    assert_eq!(total, 0);

    let payment = h.store.get_payment(&reference).await.unwrap().unwrap();
    assert_eq!(payment.service_request_id, None);
}

#[tokio::test]
async fn booking_fee_cannot_be_reused() {
    let h = Harness::new();
    let reference = h.pay_booking_fee(false).await;
    h.workflow
        .create_request(&h.client_actor(), h.booking(reference.clone(), false))
        .await
        .unwrap();

    let err = h
        .workflow
        .create_request(&h.client_actor(), h.booking(reference, false))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::PaymentValidation { .. }));
}

#[tokio::test]
async fn near_booking_is_auto_flagged() {
    let h = Harness::new();
    let reference = h.pay_booking_fee(false).await;
    let mut input = h.booking(reference, false);
    input.booking_date = in_days(1);

    let request = h
        .workflow
        .create_request(&h.client_actor(), input)
        .await
        .unwrap()
        .service_request;
    assert!(request.auto_flagged_emergency);
    assert!(!request.is_emergency);
    assert_eq!(request.initial_booking_fee, Decimal::from(2000));
}

#[tokio::test]
async fn backup_stays_busy_until_every_job_finishes() {
    let h = Harness::new();
    let y = h.add_serviceman("Yemi Electrician", Decimal::ZERO, 0);
    let z = h.add_serviceman("Zainab Electrician", Decimal::ZERO, 0);

    let first = h.in_progress(&y, None).await;
    assert!(!h.profile(y.id).await.is_available);

    let second = h.in_progress(&z, Some(&y)).await;
    assert_eq!(second.backup_serviceman_id, Some(y.id));
    assert_eq!(active_jobs(&h, y.id).await, 2);
    assert!(!h.profile(y.id).await.is_available);

    h.workflow
        .complete_job(&serviceman_actor(&y), first.id, CompleteJobInput::default())
        .await
        .unwrap();
    assert_eq!(active_jobs(&h, y.id).await, 1);
    assert!(!h.profile(y.id).await.is_available);

    h.workflow
        .complete_job(&serviceman_actor(&z), second.id, CompleteJobInput::default())
        .await
        .unwrap();
    assert_eq!(active_jobs(&h, y.id).await, 0);
    assert!(h.profile(y.id).await.is_available);
    assert!(h.profile(z.id).await.is_available);

    // Only the primary's counter moves
    assert_eq!(h.profile(y.id).await.total_jobs_completed, 1);
    assert_eq!(h.profile(z.id).await.total_jobs_completed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_keep_remaining_job_busy() {
    let h = Harness::new();
    let x = h.add_serviceman("Xavier Plumber", Decimal::ZERO, 0);

    let a = h.in_progress(&x, None).await;
    let b = h.in_progress(&x, None).await;
    let c = h.in_progress(&x, None).await;

    let actor = serviceman_actor(&x);
    let tasks: Vec<_> = [a.id, b.id]
        .into_iter()
        .map(|id| {
            let workflow = h.workflow.clone();
            tokio::spawn(async move {
                workflow
                    .complete_job(&actor, id, CompleteJobInput::default())
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let profile = h.profile(x.id).await;
    assert_eq!(profile.total_jobs_completed, 2);
    assert!(!profile.is_available, "job {} is still in progress", c.id);

    h.workflow
        .complete_job(&actor, c.id, CompleteJobInput::default())
        .await
        .unwrap();
    let profile = h.profile(x.id).await;
    assert_eq!(profile.total_jobs_completed, 3);
    assert!(profile.is_available);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_completions_of_one_job_count_once() {
    let h = Harness::new();
    let x = h.add_serviceman("Xavier Plumber", Decimal::ZERO, 0);
    let job = h.in_progress(&x, None).await;
    let actor = serviceman_actor(&x);

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let workflow = h.workflow.clone();
            tokio::spawn(async move {
                workflow
                    .complete_job(&actor, job.id, CompleteJobInput::default())
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(WorkflowError::InvalidStateTransition { .. }) | Err(WorkflowError::ConcurrentModification(_)) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(h.profile(x.id).await.total_jobs_completed, 1);
}

#[tokio::test]
async fn wrong_state_event_changes_nothing() {
    let h = Harness::new();
    let request = h.open_request().await;
    let before = h.store.get_request(request.id).await.unwrap().unwrap();
    let history_before = h.history(request.id).await;

    let err = h
        .workflow
        .finalize_price(&h.admin_actor(), request.id, FinalizePriceInput::default())
        .await
        .unwrap_err();
    match err {
        WorkflowError::InvalidStateTransition { current, .. } => {
            assert_eq!(current, ServiceRequestStatus::PendingAdminAssignment)
        }
        other => panic!("expected invalid transition, got {:?}", other),
    }

    let after = h.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(h.history(request.id).await, history_before);
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let h = Harness::new();
    let x = h.add_serviceman("Xavier Plumber", Decimal::ZERO, 0);
    h.in_progress(&x, None).await;

    // Simulate drift, then repair it
    let mut profile = h.profile(x.id).await;
    profile.is_available = true;
    h.store.insert_profile(profile);

    assert!(h.availability.reconcile(x.id).await.unwrap());
    assert!(!h.availability.reconcile(x.id).await.unwrap());
    assert!(!h.profile(x.id).await.is_available);
}

#[tokio::test]
async fn cancelling_in_progress_job_frees_serviceman() {
    let h = Harness::new();
    let x = h.add_serviceman("Xavier Plumber", Decimal::ZERO, 0);
    let job = h.in_progress(&x, None).await;

    let err = h
        .workflow
        .cancel(&h.client_actor(), job.id, CancelRequestInput::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidStateTransition { .. }));

    let cancelled = h
        .workflow
        .cancel(
            &h.admin_actor(),
            job.id,
            CancelRequestInput {
                reason: Some("Client relocated".to_string()),
            },
        )
        .await
        .unwrap()
        .service_request;
    assert_eq!(cancelled.status, ServiceRequestStatus::Cancelled);
    assert!(h.profile(x.id).await.is_available);

    let notified = h.notifications_for(x.id).await;
    assert!(notified
        .iter()
        .any(|n| n.notification_type == NotificationType::RequestCancelled));
}

#[tokio::test]
async fn reassignment_moves_availability_with_the_job() {
    let h = Harness::new();
    let x = h.add_serviceman("Xavier Plumber", Decimal::ZERO, 0);
    let w = h.add_serviceman("Wale Plumber", Decimal::ZERO, 0);
    let job = h.in_progress(&x, None).await;
    let history_len = h.history(job.id).await.len();

    let reassigned = h
        .workflow
        .reassign_serviceman(
            &h.admin_actor(),
            job.id,
            AssignServicemanInput {
                serviceman_id: w.id,
                backup_serviceman_id: None,
                notes: Some("Xavier is unwell".to_string()),
            },
        )
        .await
        .unwrap()
        .service_request;

    assert_eq!(reassigned.status, ServiceRequestStatus::InProgress);
    assert_eq!(reassigned.serviceman_id, Some(w.id));
    assert!(h.profile(x.id).await.is_available);
    assert!(!h.profile(w.id).await.is_available);
    assert_eq!(h.history(job.id).await.len(), history_len);

    let notes = h.workflow.list_notes(&h.admin_actor(), job.id).await.unwrap();
    assert!(notes.iter().any(|n| n.note_type == NoteType::System));
}

#[tokio::test]
async fn underpaid_service_payment_is_marked_failed() {
    let h = Harness::new();
    let x = h.add_serviceman("Xavier Plumber", Decimal::ZERO, 0);
    let request = h.priced(&x, None).await;

    let reference = h.start_service_payment(request.id).await;
    h.gateway.settle(&reference, GatewayStatus::Success, Decimal::from(5000));

    let err = h.payments.verify(&h.client, &reference).await.unwrap_err();
    assert!(matches!(err, WorkflowError::PaymentValidation { .. }));

    let payment = h.store.get_payment(&reference).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    let request = h.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(request.status, ServiceRequestStatus::AwaitingClientApproval);
}

#[tokio::test]
async fn service_payment_settles_with_the_transition() {
    let h = Harness::new();
    let x = h.add_serviceman("Xavier Plumber", Decimal::ZERO, 0);
    let request = h.priced(&x, None).await;
    let reference = h.start_service_payment(request.id).await;

    let pending = h.store.get_payment(&reference).await.unwrap().unwrap();
    assert_eq!(pending.status, PaymentStatus::Pending);

    let verified = h.payments.verify(&h.client, &reference).await.unwrap();
    assert_eq!(verified.status, PaymentStatus::Successful);

    let payment = h.store.get_payment(&reference).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Successful);
    assert!(payment.paid_at.is_some());
    let request = h.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(request.status, ServiceRequestStatus::PaymentCompleted);

    // Verifying again is a no-op
    let again = h.payments.verify(&h.client, &reference).await.unwrap();
    assert_eq!(again.service_request_status.as_deref(), Some("PAYMENT_COMPLETED"));
    let automated = h
        .history(request.id)
        .await
        .into_iter()
        .filter(|entry| entry.new_status == ServiceRequestStatus::PaymentCompleted)
        .count();
    assert_eq!(automated, 1);
}

#[tokio::test]
async fn verify_advances_request_left_behind_by_a_settled_payment() {
    let h = Harness::new();
    let x = h.add_serviceman("Xavier Plumber", Decimal::ZERO, 0);
    let request = h.priced(&x, None).await;
    let reference = h.start_service_payment(request.id).await;

    // Payment recorded as paid while the request never advanced
    h.store
        .set_payment_status(&reference, PaymentStatus::Successful, Some(chrono::Utc::now()))
        .await
        .unwrap();

    let err = h
        .payments
        .initialize_service_payment(
            &h.client,
            ServicePaymentInput {
                service_request_id: request.id,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::PaymentValidation { .. }));

    let verified = h.payments.verify(&h.client, &reference).await.unwrap();
    assert_eq!(verified.service_request_status.as_deref(), Some("PAYMENT_COMPLETED"));

    let request = h.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(request.status, ServiceRequestStatus::PaymentCompleted);
    let latest = &h.history(request.id).await[0];
    assert_eq!(latest.new_status, ServiceRequestStatus::PaymentCompleted);
    assert!(latest.is_automated);
}

#[tokio::test]
async fn payment_for_cancelled_request_is_still_recorded() {
    let h = Harness::new();
    let x = h.add_serviceman("Xavier Plumber", Decimal::ZERO, 0);
    let request = h.priced(&x, None).await;
    let reference = h.start_service_payment(request.id).await;

    h.workflow
        .cancel(
            &h.admin_actor(),
            request.id,
            CancelRequestInput {
                reason: Some("Client moved out".to_string()),
            },
        )
        .await
        .unwrap();

    let verified = h.payments.verify(&h.client, &reference).await.unwrap();
    assert_eq!(verified.service_request_status.as_deref(), Some("CANCELLED"));

    let payment = h.store.get_payment(&reference).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Successful);
    let request = h.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(request.status, ServiceRequestStatus::Cancelled);
}

#[tokio::test]
async fn servicemen_only_see_their_own_jobs() {
    let h = Harness::new();
    let x = h.add_serviceman("Xavier Plumber", Decimal::ZERO, 0);
    let w = h.add_serviceman("Wale Plumber", Decimal::ZERO, 0);
    let job = h.in_progress(&x, None).await;

    let err = h
        .workflow
        .get_request(&serviceman_actor(&w), job.id)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Unauthorized(_)));

    let (mine, total) = h
        .workflow
        .list_requests(&serviceman_actor(&x), None, PageWindow { limit: 10, offset: 0 })
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(mine[0].id, job.id);
}

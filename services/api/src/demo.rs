use athlete_vote::config::VotingConfig;
use athlete_vote::error::AppError;
use athlete_vote::voting::{
    Ballot, InProcessNotifier, ManualClock, NewSubmission, SubjectProfile, Submission,
    SubmissionEvent, Subscription, Topics, VoteType, VoterId,
};
use chrono::{Duration, Utc};
use clap::Args;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::infra::{build_service, Service};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Approval threshold percentage (defaults to 70).
    #[arg(long)]
    pub(crate) approval_threshold: Option<f64>,
    /// Minimum number of votes for an approval to count (defaults to 1).
    #[arg(long)]
    pub(crate) minimum_quorum: Option<u64>,
    /// Print every event delivered to the live subscriber.
    #[arg(long)]
    pub(crate) show_events: bool,
}

struct DemoContext {
    service: Arc<Service>,
    clock: Arc<ManualClock>,
    events: Subscription,
    show_events: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let mut config = VotingConfig::default();
    if let Some(threshold) = args.approval_threshold {
        config.approval_threshold = threshold;
    }
    if let Some(quorum) = args.minimum_quorum {
        config.minimum_quorum = quorum;
    }

    let notifier = Arc::new(InProcessNotifier::with_capacity(config.notifier_capacity));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = build_service(&config, notifier.clone(), clock.clone());
    let mut ctx = DemoContext {
        service,
        clock,
        events: notifier.subscribe(Topics::All),
        show_events: args.show_events,
    };

    println!("Community voting demo");
    println!(
        "  Approval threshold: {:.0}% | Minimum quorum: {} | Voting window: {} days",
        config.approval_threshold, config.minimum_quorum, config.voting_window_days
    );

    scenario_single_confident_vote(&mut ctx)?;
    scenario_split_vote(&mut ctx)?;
    scenario_changed_mind(&mut ctx)?;
    scenario_concurrent_voters(&mut ctx)?;

    Ok(())
}

fn nomination(name: &str, sport: &str, position: &str) -> NewSubmission {
    let mut attributes = BTreeMap::new();
    attributes.insert("position".to_string(), position.to_string());
    NewSubmission {
        subject: SubjectProfile {
            name: name.to_string(),
            category: sport.to_string(),
            attributes,
        },
        voting_deadline: None,
    }
}

fn open(ctx: &DemoContext, request: NewSubmission) -> Result<Submission, AppError> {
    let created = ctx.service.create_submission(request)?;
    println!(
        "  Opened {} ({}) until {}",
        created.submission.subject.name,
        created.submission.subject.category,
        created.submission.voting_deadline.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(created.submission)
}

fn cast(
    ctx: &DemoContext,
    submission: &Submission,
    voter: &str,
    vote_type: VoteType,
    confidence: u8,
) -> Result<(), AppError> {
    ctx.service
        .cast_vote(&submission.id, &VoterId::from(voter), Ballot::new(vote_type, confidence))?;
    Ok(())
}

fn close_voting(ctx: &mut DemoContext, submission: &Submission) -> Result<(), AppError> {
    ctx.clock
        .set(submission.voting_deadline + Duration::seconds(1));
    let resolved = ctx.service.sweep()?;
    println!("  Deadline passed; sweep resolved {} submission(s)", resolved);
    report(ctx, submission)
}

fn report(ctx: &mut DemoContext, submission: &Submission) -> Result<(), AppError> {
    let view = ctx.service.get_submission_with_tally(&submission.id)?;
    println!(
        "  Status: {} | for {} / against {} | approval {:.1}% | avg confidence {:.1}",
        view.submission.status,
        view.tally.votes_for,
        view.tally.votes_against,
        view.tally.approval_percentage,
        view.tally.average_confidence
    );
    print_events(ctx);
    Ok(())
}

fn print_events(ctx: &mut DemoContext) {
    let mut delivered = 0;
    while let Some(event) = ctx.events.try_next() {
        delivered += 1;
        if ctx.show_events {
            describe_event(&event);
        }
    }
    println!("  Live subscriber received {} event(s)", delivered);
}

fn describe_event(event: &SubmissionEvent) {
    let snapshot = event.snapshot();
    println!(
        "    - {}: {} votes ({} for / {} against)",
        event.kind(),
        snapshot.total_votes,
        snapshot.votes_for,
        snapshot.votes_against
    );
}

fn scenario_single_confident_vote(ctx: &mut DemoContext) -> Result<(), AppError> {
    println!("\nScenario A: one confident supporter");
    let submission = open(ctx, nomination("Maya Chen", "basketball", "point guard"))?;
    cast(ctx, &submission, "coach-rivera", VoteType::For, 5)?;
    close_voting(ctx, &submission)
}

fn scenario_split_vote(ctx: &mut DemoContext) -> Result<(), AppError> {
    println!("\nScenario B: a 6/4 split");
    let submission = open(ctx, nomination("Diego Alvarez", "soccer", "striker"))?;
    for idx in 0..10 {
        let vote_type = if idx < 6 {
            VoteType::For
        } else {
            VoteType::Against
        };
        cast(ctx, &submission, &format!("member-{idx}"), vote_type, 3)?;
    }
    close_voting(ctx, &submission)
}

fn scenario_changed_mind(ctx: &mut DemoContext) -> Result<(), AppError> {
    println!("\nScenario C: a voter changes their mind");
    let submission = open(ctx, nomination("Lena Fischer", "track", "400m"))?;
    cast(ctx, &submission, "scout-okafor", VoteType::For, 3)?;
    cast(ctx, &submission, "scout-okafor", VoteType::Against, 4)?;

    let votes = ctx.service.list_votes(&submission.id)?;
    for vote in &votes {
        println!(
            "  Ledger: {} voted {} (confidence {})",
            vote.voter_id,
            vote.vote_type.label(),
            vote.confidence_level
        );
    }
    report(ctx, &submission)
}

fn scenario_concurrent_voters(ctx: &mut DemoContext) -> Result<(), AppError> {
    println!("\nScenario D: two voters at the same instant");
    let submission = open(ctx, nomination("Sam Okoro", "wrestling", "heavyweight"))?;

    let results = std::thread::scope(|scope| {
        let handles: Vec<_> = [("fan-north", VoteType::For), ("fan-south", VoteType::Against)]
            .into_iter()
            .map(|(voter, vote_type)| {
                let service = ctx.service.clone();
                let id = submission.id;
                scope.spawn(move || {
                    service.cast_vote(&id, &VoterId::from(voter), Ballot::new(vote_type, 4))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect::<Vec<_>>()
    });
    for result in results {
        result?;
    }

    report(ctx, &submission)
}

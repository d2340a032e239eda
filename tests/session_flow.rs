use std::{sync::Arc, time::Duration};

use live_quiz_back::{
    config::AppConfig,
    dao::{
        models::GameEntity,
        session_store::{ChangeOp, ChangeRow, SessionStore, memory::MemorySessionStore},
    },
    dto::{
        game::{ChoiceInput, CreateGameRequest, GameSummary, QuestionInput},
        player::{AnswerRequest, JoinRequest, JoinResponse},
        session::{CreateSessionRequest, SessionStatusDto, SessionSummary},
        sync::{RoleParam, SyncQuery},
    },
    error::ServiceError,
    services::{
        answer_service, authoring_service, phase_service, roster_service, session_service,
        sync_service,
    },
    state::{AppState, FeedMessage, SharedState},
};
use uuid::Uuid;

const HOST: &str = "host-1";

async fn state_with(config: AppConfig) -> (SharedState, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new());
    let state = AppState::with_store(config, store.clone() as Arc<dyn SessionStore>).await;
    (state, store)
}

async fn state() -> SharedState {
    state_with(AppConfig::default()).await.0
}

async fn author_game(state: &SharedState, questions: usize) -> GameSummary {
    let request = CreateGameRequest {
        title: "Capitals".into(),
        questions: (0..questions)
            .map(|index| QuestionInput {
                prompt: format!("Question {index}"),
                choices: vec![
                    ChoiceInput {
                        text: "Right".into(),
                        is_correct: true,
                    },
                    ChoiceInput {
                        text: "Wrong".into(),
                        is_correct: false,
                    },
                ],
            })
            .collect(),
    };
    authoring_service::create_game(state, HOST, request)
        .await
        .expect("game")
}

async fn open_session(
    state: &SharedState,
    game: &GameSummary,
    timer_seconds: u32,
    speed_bonus: bool,
) -> SessionSummary {
    session_service::create_session(
        state,
        HOST,
        CreateSessionRequest {
            game_id: game.id,
            timer_seconds: Some(timer_seconds),
            speed_bonus: Some(speed_bonus),
        },
    )
    .await
    .expect("session")
}

async fn join(state: &SharedState, session_id: Uuid, name: &str) -> JoinResponse {
    roster_service::join(
        state,
        session_id,
        JoinRequest {
            name: name.into(),
            color: None,
        },
    )
    .await
    .expect("join")
}

fn choice(game: &GameSummary, index: usize, correct: bool) -> (Uuid, Uuid) {
    let question = &game.questions[index];
    let choice = question
        .choices
        .iter()
        .find(|choice| choice.is_correct == correct)
        .expect("choice");
    (question.id, choice.id)
}

async fn answer(
    state: &SharedState,
    session_id: Uuid,
    player: &JoinResponse,
    (question_id, choice_id): (Uuid, Uuid),
) -> Result<(), ServiceError> {
    answer_service::submit(
        state,
        session_id,
        &player.token,
        AnswerRequest {
            player_id: player.player.id,
            question_id,
            choice_id,
        },
    )
    .await
    .map(|_| ())
}

fn host_query() -> SyncQuery {
    SyncQuery {
        role: RoleParam::Host,
        player_id: None,
        token: None,
    }
}

#[tokio::test]
async fn lobby_has_no_current_question_until_started() {
    let state = state().await;
    let game = author_game(&state, 2).await;
    let session = open_session(&state, &game, 20, true).await;
    assert_eq!(session.status, SessionStatusDto::Lobby);
    assert_eq!(session.current_question_index, -1);

    let err = session_service::start(&state, HOST, session.id)
        .await
        .expect_err("no players yet");
    assert!(matches!(err, ServiceError::InvalidState(_)));

    join(&state, session.id, "Alex").await;
    let started = session_service::start(&state, HOST, session.id)
        .await
        .expect("start");
    assert_eq!(started.session.status, SessionStatusDto::Playing);
    assert_eq!(started.session.current_question_index, 0);
    assert_eq!(started.phase.expect("phase").question_index, 0);

    let err = session_service::start(&state, HOST, session.id)
        .await
        .expect_err("already started");
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn join_code_resolves_loosely_and_only_while_active() {
    let state = state().await;
    let game = author_game(&state, 1).await;
    let session = open_session(&state, &game, 20, true).await;

    let typed = format!(
        " {}-{} ",
        session.code[..3].to_lowercase(),
        session.code[3..].to_lowercase()
    );
    let joinable = session_service::resolve_code(&state, &typed)
        .await
        .expect("resolve");
    assert_eq!(joinable.session_id, session.id);
    assert!(joinable.accepting_players);
    assert_eq!(joinable.title, "Capitals");

    join(&state, session.id, "Alex").await;
    session_service::start(&state, HOST, session.id)
        .await
        .expect("start");
    session_service::end_now(&state, HOST, session.id)
        .await
        .expect("end");

    let err = session_service::resolve_code(&state, &session.code)
        .await
        .expect_err("finished sessions release their code");
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn colliding_names_get_a_numeric_suffix() {
    let state = state().await;
    let game = author_game(&state, 1).await;
    let session = open_session(&state, &game, 20, true).await;

    let first = join(&state, session.id, "Alex").await;
    let second = join(&state, session.id, "alex").await;
    let third = join(&state, session.id, "ALEX").await;

    assert_eq!(first.player.name, "Alex");
    assert_eq!(second.player.name, "alex2");
    assert_eq!(third.player.name, "ALEX3");
    assert_ne!(first.player.color, second.player.color);
}

#[tokio::test]
async fn players_cannot_join_after_start() {
    let state = state().await;
    let game = author_game(&state, 1).await;
    let session = open_session(&state, &game, 20, true).await;
    join(&state, session.id, "Alex").await;
    session_service::start(&state, HOST, session.id)
        .await
        .expect("start");

    let err = roster_service::join(
        &state,
        session.id,
        JoinRequest {
            name: "Late".into(),
            color: None,
        },
    )
    .await
    .expect_err("late join");
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn second_answer_is_rejected_and_score_is_unchanged() {
    let state = state().await;
    let game = author_game(&state, 1).await;
    let session = open_session(&state, &game, 20, false).await;
    let alex = join(&state, session.id, "Alex").await;
    session_service::start(&state, HOST, session.id)
        .await
        .expect("start");

    answer(&state, session.id, &alex, choice(&game, 0, true))
        .await
        .expect("first answer");
    let err = answer(&state, session.id, &alex, choice(&game, 0, false))
        .await
        .expect_err("second answer");
    assert!(matches!(err, ServiceError::Rejected(_)));

    let standings = roster_service::leaderboard(&state, session.id)
        .await
        .expect("leaderboard");
    assert_eq!(standings.len(), 1);
    assert_eq!(standings[0].score, 1000);
}

#[tokio::test]
async fn scoring_rewards_correct_and_early_answers() {
    let state = state().await;
    let game = author_game(&state, 1).await;
    let session = open_session(&state, &game, 30, true).await;
    let fast = join(&state, session.id, "Fast").await;
    let wrong = join(&state, session.id, "Wrong").await;
    let idle = join(&state, session.id, "Idle").await;
    session_service::start(&state, HOST, session.id)
        .await
        .expect("start");

    answer(&state, session.id, &fast, choice(&game, 0, true))
        .await
        .expect("fast");
    answer(&state, session.id, &wrong, choice(&game, 0, false))
        .await
        .expect("wrong");

    let standings = roster_service::leaderboard(&state, session.id)
        .await
        .expect("leaderboard");
    let score_of = |id: Uuid| {
        standings
            .iter()
            .find(|standing| standing.player_id == id)
            .map(|standing| standing.score)
    };

    let fast_score = score_of(fast.player.id).expect("fast standing");
    assert!((1000..=1500).contains(&fast_score));
    assert!(fast_score > 1400, "an immediate answer keeps most of the bonus");
    assert_eq!(score_of(wrong.player.id), Some(0));
    assert_eq!(score_of(idle.player.id), Some(0));
    assert_eq!(standings[0].player_id, fast.player.id);
    assert_eq!(standings[0].rank, 1);
}

#[tokio::test]
async fn lock_closes_answers_and_reveals_results_at_once() {
    let state = state().await;
    let game = author_game(&state, 2).await;
    let session = open_session(&state, &game, 20, true).await;
    let alex = join(&state, session.id, "Alex").await;
    let sam = join(&state, session.id, "Sam").await;
    session_service::start(&state, HOST, session.id)
        .await
        .expect("start");
    answer(&state, session.id, &alex, choice(&game, 0, true))
        .await
        .expect("answer");

    let locked = phase_service::lock(&state, HOST, session.id)
        .await
        .expect("lock");
    let phase = locked.phase.expect("phase");
    assert!(phase.locked);
    assert!(phase.show_results);
    assert!(!phase.show_leaderboard);

    let err = answer(&state, session.id, &sam, choice(&game, 0, true))
        .await
        .expect_err("locked");
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let snapshot = sync_service::snapshot(&state, session.id, host_query(), Some(HOST))
        .await
        .expect("snapshot");
    let question = snapshot.question.expect("question");
    assert_eq!(question.correct_choice_id, Some(choice(&game, 0, true).1));
    assert_eq!(snapshot.answered_count, 1);

    phase_service::reveal_leaderboard(&state, HOST, session.id)
        .await
        .expect("leaderboard");
    let next = session_service::advance(&state, HOST, session.id)
        .await
        .expect("advance");
    assert_eq!(next.session.current_question_index, 1);
    let phase = next.phase.expect("phase");
    assert!(!phase.locked && !phase.show_results);

    let done = session_service::advance(&state, HOST, session.id)
        .await
        .expect("finish");
    assert_eq!(done.session.status, SessionStatusDto::Finished);
    assert!(done.session.ended_at.is_some());
}

#[tokio::test]
async fn pause_freezes_the_timer_until_resumed() {
    let state = state().await;
    let game = author_game(&state, 1).await;
    let session = open_session(&state, &game, 20, true).await;
    let alex = join(&state, session.id, "Alex").await;
    session_service::start(&state, HOST, session.id)
        .await
        .expect("start");

    let paused = phase_service::pause(&state, HOST, session.id)
        .await
        .expect("pause")
        .phase
        .expect("phase");
    assert!(paused.paused);
    assert!(paused.ends_at_ms.is_none());
    let frozen = paused.paused_remaining_ms.expect("remaining");
    assert!(frozen <= 20_000);

    let err = answer(&state, session.id, &alex, choice(&game, 0, true))
        .await
        .expect_err("paused");
    assert!(matches!(err, ServiceError::InvalidState(_)));
    let err = phase_service::pause(&state, HOST, session.id)
        .await
        .expect_err("already paused");
    assert!(matches!(err, ServiceError::InvalidState(_)));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let resumed = phase_service::resume(&state, HOST, session.id)
        .await
        .expect("resume")
        .phase
        .expect("phase");
    assert!(!resumed.paused);
    assert!(resumed.ends_at_ms.is_some());
    assert!(resumed.remaining_ms <= frozen);
    assert!(resumed.remaining_ms + 100 >= frozen);

    answer(&state, session.id, &alex, choice(&game, 0, true))
        .await
        .expect("answer after resume");
}

#[tokio::test]
async fn removed_player_sees_removal_and_leaves_the_roster() {
    let state = state().await;
    let game = author_game(&state, 1).await;
    let session = open_session(&state, &game, 20, true).await;
    let alex = join(&state, session.id, "Alex").await;
    let sam = join(&state, session.id, "Sam").await;

    roster_service::remove(&state, HOST, session.id, sam.player.id)
        .await
        .expect("remove");
    roster_service::remove(&state, HOST, session.id, sam.player.id)
        .await
        .expect("removal is idempotent");

    let roster = roster_service::list_players(&state, session.id)
        .await
        .expect("players");
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].id, alex.player.id);

    let view = sync_service::snapshot(
        &state,
        session.id,
        SyncQuery {
            role: RoleParam::Player,
            player_id: Some(sam.player.id),
            token: Some(sam.token.clone()),
        },
        None,
    )
    .await
    .expect("snapshot");
    assert_eq!(view.removed, Some(true));
    assert!(view.me.is_none());

    session_service::start(&state, HOST, session.id)
        .await
        .expect("start");
    let err = answer(&state, session.id, &sam, choice(&game, 0, true))
        .await
        .expect_err("removed");
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn host_actions_require_the_owner() {
    let state = state().await;
    let game = author_game(&state, 1).await;
    let session = open_session(&state, &game, 20, true).await;
    join(&state, session.id, "Alex").await;

    let err = session_service::start(&state, "someone-else", session.id)
        .await
        .expect_err("foreign host");
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let err = sync_service::snapshot(&state, session.id, host_query(), None)
        .await
        .expect_err("missing host header");
    assert!(matches!(err, ServiceError::Unauthorized(_)));
}

#[tokio::test]
async fn snapshot_hides_answers_from_displays() {
    let state = state().await;
    let game = author_game(&state, 1).await;
    let session = open_session(&state, &game, 20, true).await;
    let alex = join(&state, session.id, "Alex").await;
    session_service::start(&state, HOST, session.id)
        .await
        .expect("start");
    answer(&state, session.id, &alex, choice(&game, 0, true))
        .await
        .expect("answer");

    let display = sync_service::snapshot(
        &state,
        session.id,
        SyncQuery {
            role: RoleParam::Display,
            player_id: None,
            token: None,
        },
        None,
    )
    .await
    .expect("display");
    assert_eq!(display.answered_count, 1);
    assert!(display.answers.is_none());
    assert!(display.available_actions.is_none());
    assert!(display.question.expect("question").correct_choice_id.is_none());

    let host = sync_service::snapshot(&state, session.id, host_query(), Some(HOST))
        .await
        .expect("host");
    assert_eq!(host.answers.expect("answers").len(), 1);
    assert!(host.available_actions.is_some_and(|actions| !actions.is_empty()));
}

#[tokio::test]
async fn expired_question_is_locked_by_the_watcher() {
    let mut config = AppConfig::default();
    config.timer.min_seconds = 1;
    config.answer_grace_ms = 0;
    let (state, _store) = state_with(config).await;
    let game = author_game(&state, 1).await;
    let session = open_session(&state, &game, 1, true).await;
    join(&state, session.id, "Alex").await;
    session_service::start(&state, HOST, session.id)
        .await
        .expect("start");

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let snapshot = sync_service::snapshot(&state, session.id, host_query(), Some(HOST))
        .await
        .expect("snapshot");
    let phase = snapshot.phase.expect("phase");
    assert!(phase.locked);
    assert!(phase.show_results);
}

#[tokio::test]
async fn feed_starts_with_resync_then_carries_writes() {
    let state = state().await;
    let game = author_game(&state, 1).await;
    let session = open_session(&state, &game, 20, true).await;

    let mut receiver = sync_service::subscribe(&state, session.id);
    let first = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("resync in time")
        .expect("open feed");
    assert!(matches!(first, FeedMessage::Resync));

    let alex = join(&state, session.id, "Alex").await;
    let next = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("change in time")
        .expect("open feed");
    let FeedMessage::Change(change) = next else {
        panic!("expected a change, got {next:?}");
    };
    assert_eq!(change.session_id, session.id);
    assert_eq!(change.op, ChangeOp::Insert);
    assert!(matches!(change.row, ChangeRow::Player(ref player) if player.id == alex.player.id));
}

#[tokio::test]
async fn games_are_private_to_their_host() {
    let state = state().await;
    let game = author_game(&state, 1).await;

    let fetched = authoring_service::get_game(&state, HOST, game.id)
        .await
        .expect("owner");
    assert_eq!(fetched.questions.len(), 1);

    let err = authoring_service::get_game(&state, "someone-else", game.id)
        .await
        .expect_err("foreign host");
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let err = session_service::create_session(
        &state,
        HOST,
        CreateSessionRequest {
            game_id: game.id,
            timer_seconds: Some(1),
            speed_bonus: None,
        },
    )
    .await
    .expect_err("timer below minimum");
    assert!(matches!(err, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn degraded_state_refuses_requests() {
    let state = AppState::new(AppConfig::default());
    let err = session_service::resolve_code(&state, "ABCDEF")
        .await
        .expect_err("no store");
    assert!(matches!(err, ServiceError::Degraded));

    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    state.set_session_store(store.clone()).await;
    let game = GameEntity {
        id: Uuid::new_v4(),
        host_id: HOST.into(),
        title: "Empty".into(),
        questions: vec![],
        created_at: std::time::SystemTime::now(),
    };
    store.save_game(game.clone()).await.expect("save");
    let fetched = authoring_service::get_game(&state, HOST, game.id)
        .await
        .expect("installed store");
    assert!(fetched.questions.is_empty());
}

fn scripted_codes(codes: &'static [&'static str]) -> impl FnMut() -> String {
    let mut codes = codes.iter();
    move || codes.next().copied().unwrap_or("ZZ99ZZ").to_string()
}

#[tokio::test]
async fn playing_session_keeps_its_code_from_new_lobbies() {
    let (state, _) = state_with(AppConfig::default()).await;
    let game = author_game(&state, 1).await;
    let request = || CreateSessionRequest {
        game_id: game.id,
        timer_seconds: Some(20),
        speed_bonus: Some(true),
    };

    let first = session_service::create_session_with_codes(
        &state,
        HOST,
        request(),
        scripted_codes(&["AB23CD"]),
    )
    .await
    .expect("first session");
    assert_eq!(first.code, "AB23CD");
    join(&state, first.id, "Alex").await;
    session_service::start(&state, HOST, first.id)
        .await
        .expect("start");

    let second = session_service::create_session_with_codes(
        &state,
        HOST,
        request(),
        scripted_codes(&["AB23CD", "QQ77RR"]),
    )
    .await
    .expect("second session");
    assert_eq!(second.code, "QQ77RR");
    let resolved = session_service::resolve_code(&state, "ab-23cd")
        .await
        .expect("resolve");
    assert_eq!(resolved.session_id, first.id);

    session_service::end_now(&state, HOST, first.id)
        .await
        .expect("end");
    let third = session_service::create_session_with_codes(
        &state,
        HOST,
        request(),
        scripted_codes(&["AB23CD"]),
    )
    .await
    .expect("third session");
    assert_eq!(third.code, "AB23CD");
}

#[tokio::test]
async fn overlapping_advances_never_reopen_a_question() {
    let (state, store) = state_with(AppConfig::default()).await;
    let game = author_game(&state, 3).await;
    let session = open_session(&state, &game, 20, true).await;
    join(&state, session.id, "Alex").await;
    session_service::start(&state, HOST, session.id)
        .await
        .expect("start");

    let (left, right) = tokio::join!(
        session_service::advance(&state, HOST, session.id),
        session_service::advance(&state, HOST, session.id),
    );
    let advanced = [&left, &right].iter().filter(|result| result.is_ok()).count();
    assert!(advanced >= 1);
    for result in [left, right] {
        if let Err(err) = result {
            assert!(matches!(err, ServiceError::Rejected(_)), "{err:?}");
        }
    }

    let summary = sync_service::snapshot(&state, session.id, host_query(), Some(HOST))
        .await
        .expect("snapshot")
        .session;
    assert_eq!(summary.current_question_index, advanced as i32);
    let current = store
        .find_phase(session.id, advanced as u32)
        .await
        .expect("read")
        .expect("phase row");
    assert!(!current.locked && !current.show_results);
    assert!(current.ends_at.is_some());
}

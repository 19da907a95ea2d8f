//! The appointment assistant's dialogue
//!
//! Top level: `idle -> init -> dialogue`, with `help` and `nomatch` as
//! detours that return through `dialogue.hist`. Inside `dialogue` the user
//! gives a name, then picks from the menu: create a meeting, ask about a
//! person, or get home assistance.

use super::context::{Field, Slot};
use super::event::EventKind;
use super::grammar::{Grammar, Intent, Vocabulary};
use super::prompts::{PromptCatalog, PromptId};
use super::task::TaskKind;
use super::topology::{
    go, Action, ChartBuilder, ChartError, Guard, HistoryDepth, NodeDecl, Speech, Statechart,
    TransitionDecl,
};

/// Where a prompt region goes once its re-prompts are used up
const GIVE_UP: &str = "init";

const HELP: &str = "I can help you to create meetings in your calendar.";

/// Classifier intent -> (state, reply)
const HOME_INTENTS: [(&str, &str, &str); 7] = [
    ("vacuum", "vacuum", "I will clean the floor."),
    ("move_to_trash", "moveToTrash", "I will throw it into the trash."),
    ("give", "give", "I will give it to them."),
    ("turn_on_light", "turnOnLight", "I'll turn on the light."),
    ("turn_off_light", "turnOffLight", "I will turn off the light."),
    ("cook", "cook", "I will prepare the meal."),
    ("inform_oven_warm", "informOvenWarm", "Ok, thanks."),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ChartOptions {
    /// Send meeting-form input no matcher understood to the intent classifier
    pub classify_unmatched_form_input: bool,
}

/// Build and validate the full dialogue
pub fn appointment_chart(
    grammar: Grammar,
    prompts: PromptCatalog,
    options: ChartOptions,
) -> Result<Statechart, ChartError> {
    let clarify = Speech::OneOf(grammar.clarifications().to_vec());
    let menu = grammar.menu_description();
    let mut b = ChartBuilder::new("idle");

    b.atomic("idle").on(EventKind::Click, go("init"));
    b.atomic("init")
        .on(EventKind::TtsReady, go("dialogue"))
        .on(EventKind::Click, go("dialogue"));
    b.atomic("help")
        .entry(say(HELP))
        .on(EventKind::EndSpeech, go("dialogue.hist"));
    b.atomic("nomatch")
        .entry(Action::Speak(clarify.clone()))
        .on(EventKind::EndSpeech, go("dialogue.hist"));

    b.compound("dialogue", "getUsername")
        .interrupt(
            EventKind::Recognised,
            go("help").when(Guard::PatternSet(Intent::Help)),
        )
        .on(EventKind::Recognised, go("nomatch"));
    b.history("dialogue.hist", HistoryDepth::Deep);

    let username = prompt_region(
        &mut b,
        "dialogue.getUsername",
        "prompt",
        PromptId::GetUsername,
        &clarify,
    );
    username.on(
        EventKind::Recognised,
        go("dialogue.welcome").when(Guard::InVocabulary(Vocabulary::OptOut)),
    );
    menu_routes(username).on(
        EventKind::Recognised,
        go("dialogue.welcome").then(Action::AssignUsername),
    );

    let welcome = prompt_region(
        &mut b,
        "dialogue.welcome",
        "prompt",
        PromptId::Welcome,
        &clarify,
    );
    menu_routes(welcome).on(EventKind::Recognised, no_match("dialogue.welcome"));

    b.atomic("dialogue.menuHelp")
        .entry(say(&menu))
        .on(EventKind::EndSpeech, go("dialogue.welcome.hist"));

    home_assistant(&mut b, &clarify);
    celebrity(&mut b, &clarify);
    meeting(&mut b, &clarify, options);

    let confirmation = prompt_region(
        &mut b,
        "dialogue.confirmation",
        "prompt",
        PromptId::Confirmation,
        &clarify,
    );
    binary(confirmation, go("dialogue.info"), go("dialogue.welcome"))
        .on(EventKind::Recognised, no_match("dialogue.confirmation"));

    b.atomic("dialogue.info")
        .entry(say(
            "Your meeting {title} on {day} {time?at {time}|for the whole day} has been created!",
        ))
        .on(EventKind::EndSpeech, go("dialogue.welcome"));

    b.build(grammar, prompts)
}

fn say(template: &str) -> Action {
    Action::Speak(Speech::Template(template.to_string()))
}

fn no_match(region: &str) -> TransitionDecl {
    go(&format!("{region}.nomatch")).then(Action::CountRetry)
}

/// `prompt -> ask -> (nomatch -> ask)*` plus a shallow history
fn prompt_region<'b>(
    b: &'b mut ChartBuilder,
    path: &str,
    initial: &str,
    id: PromptId,
    clarify: &Speech,
) -> &'b mut NodeDecl {
    let prompt = format!("{path}.prompt");
    let ask = format!("{path}.ask");
    b.atomic(&prompt)
        .entry(Action::Speak(Speech::Prompt(id)))
        .on(EventKind::EndSpeech, go(&ask));
    b.atomic(&ask).entry(Action::Listen);
    b.atomic(&format!("{path}.nomatch"))
        .entry(Action::Speak(clarify.clone()))
        .on(EventKind::EndSpeech, go(&ask));
    b.history(&format!("{path}.hist"), HistoryDepth::Shallow);

    b.compound(path, initial)
        .prompt(id)
        .on(EventKind::Timeout, go(GIVE_UP).when(Guard::RetriesExhausted))
        .on(EventKind::Timeout, go(&prompt).then(Action::CountRetry))
}

fn binary(region: &mut NodeDecl, yes: TransitionDecl, no: TransitionDecl) -> &mut NodeDecl {
    region
        .on(
            EventKind::Recognised,
            yes.when(Guard::InVocabulary(Vocabulary::Affirmative)),
        )
        .on(
            EventKind::Recognised,
            no.when(Guard::InVocabulary(Vocabulary::Negative)),
        )
}

fn menu_routes(region: &mut NodeDecl) -> &mut NodeDecl {
    region
        .on(
            EventKind::Recognised,
            go("dialogue.meeting").when(Guard::Intent(Intent::Meeting)),
        )
        .on(
            EventKind::Recognised,
            go("dialogue.askForCelebrity")
                .when(Guard::Intent(Intent::WhoIs))
                .then(Action::AssignCelebrity),
        )
        .on(
            EventKind::Recognised,
            go("dialogue.homeAssistant").when(Guard::Intent(Intent::HomeAssistant)),
        )
        .on(
            EventKind::Recognised,
            go("dialogue.menuHelp").when(Guard::Intent(Intent::Options)),
        )
        .on(
            EventKind::Recognised,
            go("init").when(Guard::Intent(Intent::Stop)),
        )
}

fn home_assistant(b: &mut ChartBuilder, clarify: &Speech) {
    let path = "dialogue.homeAssistant";
    let state = |name: &str| format!("{path}.{name}");

    prompt_region(b, path, "prompt", PromptId::HomeAssistant, clarify)
        .on(EventKind::Recognised, go(&state("classify")));

    let classify = b.invoke(&state("classify"), TaskKind::ClassifyIntent);
    for (intent, name, _) in HOME_INTENTS {
        classify.on(
            EventKind::TaskDone,
            go(&state(name)).when(Guard::TaskIntent(intent.to_string())),
        );
    }
    classify
        .on(
            EventKind::TaskDone,
            go(&state("askOvenWarm")).when(Guard::TaskIntent("ask_oven_warm".to_string())),
        )
        .on(
            EventKind::TaskDone,
            go(&state("stop")).when(Guard::TaskIntent("stop".to_string())),
        )
        .on(EventKind::TaskDone, no_match(path))
        .on(EventKind::TaskError, go(&state("unavailable")));

    for (_, name, reply) in HOME_INTENTS {
        b.atomic(&state(name))
            .entry(say(reply))
            .on(EventKind::EndSpeech, go(&state("prompt")));
    }
    b.atomic(&state("askOvenWarm"))
        .entry(Action::Speak(Speech::OneOf(vec![
            "The oven is warm.".to_string(),
            "The oven is cold.".to_string(),
        ])))
        .on(EventKind::EndSpeech, go(&state("prompt")));
    b.atomic(&state("stop"))
        .entry(say("Alright."))
        .on(EventKind::EndSpeech, go("dialogue.welcome"));
    b.atomic(&state("unavailable"))
        .entry(say("Sorry, the home assistant is not available right now."))
        .on(EventKind::EndSpeech, go("dialogue.welcome"));
}

fn celebrity(b: &mut ChartBuilder, clarify: &Speech) {
    b.invoke("dialogue.askForCelebrity", TaskKind::KnowledgeLookup)
        .entry(Action::Assign(Field::CelebrityInfo, String::new()))
        .on(
            EventKind::TaskDone,
            go("dialogue.infoCelebrity").then(Action::StoreAbstract),
        )
        .on(EventKind::TaskError, go("dialogue.lookupFailed"));

    b.atomic("dialogue.infoCelebrity")
        .entry(say(
            "{celebrity_info|I couldn't find any info about {celebrity_name}!}",
        ))
        .on(EventKind::EndSpeech, go("dialogue.meetingCelebrity"));
    b.atomic("dialogue.lookupFailed")
        .entry(say("Sorry, I didn't get any info about {celebrity_name}."))
        .on(EventKind::EndSpeech, go("dialogue.meetingCelebrity"));

    let region = prompt_region(
        b,
        "dialogue.meetingCelebrity",
        "prompt",
        PromptId::MeetingCelebrity,
        clarify,
    );
    binary(
        region,
        go("dialogue.meeting.fromCelebrity"),
        go("dialogue.welcome"),
    )
    .on(EventKind::Recognised, no_match("dialogue.meetingCelebrity"));
}

fn meeting(b: &mut ChartBuilder, clarify: &Speech, options: ChartOptions) {
    let path = "dialogue.meeting";
    let state = |name: &str| format!("{path}.{name}");
    let get_title = state("getTitle");

    b.compound(path, "createMeeting")
        .entry(Action::ClearForm)
        .on(EventKind::FormComplete, go("dialogue.confirmation"));
    b.atomic(&state("createMeeting"))
        .entry(say("Let's create a meeting."))
        .on(EventKind::EndSpeech, go(&get_title));
    b.atomic(&state("fromCelebrity"))
        .entry(Action::Assign(
            Field::Title,
            "Meeting with {celebrity_name}".to_string(),
        ))
        .on(EventKind::Always, go(&get_title));

    let unmatched = |region: &str| {
        if options.classify_unmatched_form_input {
            go(&state("classify"))
        } else {
            no_match(region)
        }
    };

    let slots = [
        (Slot::Title, "getTitle", PromptId::GetTitle, "getDay"),
        (Slot::Day, "getDay", PromptId::GetDay, "wholeDay"),
        (Slot::Time, "getTime", PromptId::GetTime, "done"),
    ];
    for (slot, name, prompt, next) in slots {
        let region = state(name);
        let next = state(next);
        slot_region(b, &region, prompt, clarify, slot, &next)
            .on(
                EventKind::Recognised,
                go(&next)
                    .when(Guard::SlotMatches(slot))
                    .then(Action::AssignSlot(slot)),
            )
            .on(
                EventKind::Recognised,
                go(&get_title)
                    .when(Guard::FreeForm)
                    .then(Action::MergeFreeForm),
            )
            .on(EventKind::Recognised, unmatched(&region));
    }

    // Answering the whole-day question with a time fills the time slot
    let whole_day = state("wholeDay");
    let get_time = state("getTime");
    let region = slot_region(
        b,
        &whole_day,
        PromptId::WholeDay,
        clarify,
        Slot::Time,
        &get_time,
    );
    binary(region, go(&state("done")), go(&get_time))
        .on(
            EventKind::Recognised,
            go(&get_time)
                .when(Guard::SlotMatches(Slot::Time))
                .then(Action::AssignSlot(Slot::Time)),
        )
        .on(
            EventKind::Recognised,
            go(&get_title)
                .when(Guard::FreeForm)
                .then(Action::MergeFreeForm),
        )
        .on(EventKind::Recognised, unmatched(&whole_day));

    b.invoke(&state("classify"), TaskKind::ClassifyIntent)
        .on(
            EventKind::TaskDone,
            go(&get_title).then(Action::MergeEntities),
        )
        .on(EventKind::TaskError, go(&state("notUnderstood")));
    b.atomic(&state("notUnderstood"))
        .entry(say("Sorry, I could not understand that."))
        .on(EventKind::EndSpeech, go(&get_title));

    b.final_state(&state("done"));
}

/// Prompt region that starts with a skip-if-filled check
fn slot_region<'b>(
    b: &'b mut ChartBuilder,
    path: &str,
    id: PromptId,
    clarify: &Speech,
    slot: Slot,
    skip_to: &str,
) -> &'b mut NodeDecl {
    b.atomic(&format!("{path}.init"))
        .on(
            EventKind::Always,
            go(skip_to).when(Guard::SlotFilled(slot)),
        )
        .on(EventKind::Always, go(&format!("{path}.prompt")));
    prompt_region(b, path, "init", id, clarify)
}

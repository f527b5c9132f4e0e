//! `fieldwatch-demo`: a CLI for exercising [`fieldwatch::Agent`] by hand or
//! from a script. This is the crate's stand-in for the debugger front-end a
//! real deployment would build around the engine, useful for poking at the
//! engine interactively, not part of the engine itself.

use std::process::exit;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use fieldwatch::{Agent, ClassModel, FieldLocator, IdentityKey, SeedClass, StaticClassModel};

#[derive(Parser)]
#[command(name = "fieldwatch-demo", version, about = "Exercise the fieldwatch engine")]
struct Cli {
    /// Flip the engine's DEBUG flag before running the command.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enable tracking for owner-class/field-name.
    Enable { owner_class: String, field_name: String },
    /// Disable tracking for owner-class/field-name.
    Disable { owner_class: String, field_name: String },
    /// Emulate a field write with a synthetic container value.
    Watchpoint { owner_class: String, field_name: String },
    /// Clear all recorded history for owner-class/field-name.
    Clear { owner_class: String, field_name: String },
    /// Print recorded field modifications for owner-class/field-name.
    History { owner_class: String, field_name: String },
    /// Print the stack blob recorded for a given field modification index.
    DumpStack {
        owner_class: String,
        field_name: String,
        index: usize,
    },
    /// Run one of the numbered scenarios below (1-6).
    RunScenario { name: u8 },
}

fn no_resolve(_: &str) -> Option<Box<dyn ClassModel>> {
    None
}

fn self_seed(class_name: &str) -> SeedClass {
    SeedClass {
        symbolic_name: class_name.to_owned(),
        ancestry: vec![class_name.to_owned()],
    }
}

fn list_model(name: &str) -> StaticClassModel {
    StaticClassModel::new(name).with_interface("java/util/List")
}

fn map_model(name: &str) -> StaticClassModel {
    StaticClassModel::new(name).with_interface("java/util/Map")
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let agent = Agent::new();
    agent.config().set_debug(cli.debug);

    match cli.command {
        Command::Enable { owner_class, field_name } => {
            agent.set_tracking_enabled(&owner_class, &field_name, true);
            println!("tracking enabled for {owner_class}.{field_name}");
        }
        Command::Disable { owner_class, field_name } => {
            agent.set_tracking_enabled(&owner_class, &field_name, false);
            println!("tracking disabled for {owner_class}.{field_name}");
        }
        Command::Watchpoint { owner_class, field_name } => {
            agent.register_field(&owner_class, &field_name, "Ljava/util/List;", &[self_seed(&owner_class)]);
            let value = IdentityKey::new(Arc::new(()));
            let model = list_model(&owner_class);
            agent.emulate_field_watchpoint(&owner_class, &field_name, None, Some(value), Some(&model), &no_resolve);
            println!("emulated a field write to {owner_class}.{field_name}");
        }
        Command::Clear { owner_class, field_name } => {
            agent.clear_history(&owner_class, &field_name);
            println!("cleared history for {owner_class}.{field_name}");
        }
        Command::History { owner_class, field_name } => {
            let locator = FieldLocator::static_field(&owner_class, &field_name);
            let modifications = agent.get_field_modifications(&locator);
            if modifications.is_empty() {
                println!("no recorded modifications for {owner_class}.{field_name}");
            }
            for (index, modification) in modifications.iter().enumerate() {
                println!("[{index}] container={:?} frames={}", modification.container, modification.stack.len());
            }
        }
        Command::DumpStack {
            owner_class,
            field_name,
            index,
        } => {
            let locator = FieldLocator::static_field(&owner_class, &field_name);
            match agent.get_field_stack(&locator, index) {
                Some(blob) => println!("{} bytes: {:02x?}", blob.len(), blob),
                None => {
                    eprintln!("no modification recorded at index {index} for {owner_class}.{field_name}");
                    exit(1);
                }
            }
        }
        Command::RunScenario { name } => run_scenario(&agent, name),
    }
}

/// Runs one of six illustrative scenarios against the given agent and
/// prints the resulting history, so each scenario's expected trace can be
/// eyeballed interactively.
fn run_scenario(agent: &Agent, name: u8) {
    match name {
        1 => scenario_single_list(agent),
        2 => scenario_add_all(agent),
        3 => scenario_concurrent_adders(agent),
        4 => scenario_reassignment(agent),
        5 => scenario_map_put_remove(agent),
        6 => scenario_inherited_field(agent),
        other => {
            eprintln!("no such scenario: {other} (expected 1-6)");
            exit(1);
        }
    }
}

fn scenario_single_list(agent: &Agent) {
    agent.register_field("Foo", "items", "Ljava/util/List;", &[self_seed("Foo")]);
    let locator = FieldLocator::static_field("Foo", "items");
    agent.set_tracking_enabled("Foo", "items", true);

    let list = IdentityKey::new(Arc::new(()));
    let model = list_model("java/util/ArrayList");
    agent.capture_field_write("Foo", "items", None, Some(list.clone()), Some(&model), &no_resolve, false);
    agent.capture_inline(&list, IdentityKey::new(Arc::new("a")), true, false);
    agent.capture_inline(&list, IdentityKey::new(Arc::new("b")), true, false);
    agent.capture_inline(&list, IdentityKey::new(Arc::new("a")), false, false);

    println!("field modifications: {}", agent.get_field_modifications(&locator).len());
    for modification in agent.get_container_modifications(&list) {
        println!("  {} {:?}", if modification.is_addition { "+" } else { "-" }, modification.element);
    }
}

fn scenario_add_all(agent: &Agent) {
    agent.register_field("Foo", "items", "Ljava/util/List;", &[self_seed("Foo")]);
    let list = IdentityKey::new(Arc::new(()));
    agent.set_tracking_enabled("Foo", "items", true);
    let model = list_model("java/util/ArrayList");
    agent.capture_field_write("Foo", "items", None, Some(list.clone()), Some(&model), &no_resolve, false);

    for value in ["x", "y", "z"] {
        agent.capture_inline(&list, IdentityKey::new(Arc::new(value)), true, false);
    }
    let modifications = agent.get_container_modifications(&list);
    println!("addAll produced {} inline additions, in order", modifications.len());
}

fn scenario_concurrent_adders(agent: &Agent) {
    use fieldwatch::Multiset;
    use std::sync::Mutex;

    agent.register_field("Foo", "items", "Ljava/util/Set;", &[self_seed("Foo")]);
    let set = IdentityKey::new(Arc::new(()));
    agent.set_tracking_enabled("Foo", "items", true);
    let model = StaticClassModel::new("java/util/HashSet").with_interface("java/util/Set");
    agent.capture_field_write("Foo", "items", None, Some(set.clone()), Some(&model), &no_resolve, false);

    let backing: Arc<Mutex<Vec<IdentityKey>>> = Arc::new(Mutex::new(Vec::new()));
    std::thread::scope(|scope| {
        for thread_index in 0..2 {
            let agent = agent.clone();
            let set = set.clone();
            let backing = backing.clone();
            scope.spawn(move || {
                for element_index in 0..1000 {
                    let element = IdentityKey::new(Arc::new((thread_index, element_index)));
                    agent.runtime().capture_mutator(
                        &set,
                        true,
                        false,
                        || Multiset::from_elements(backing.lock().unwrap().iter().cloned()),
                        || backing.lock().unwrap().push(element),
                    );
                }
            });
        }
    });
    println!(
        "recorded {} additions across two threads",
        agent.get_container_modifications(&set).len()
    );
}

fn scenario_reassignment(agent: &Agent) {
    agent.register_field("Foo", "items", "Ljava/util/List;", &[self_seed("Foo")]);
    let locator = FieldLocator::static_field("Foo", "items");
    agent.set_tracking_enabled("Foo", "items", true);

    let a = IdentityKey::new(Arc::new("A"));
    let b = IdentityKey::new(Arc::new("B"));
    let model = list_model("java/util/ArrayList");
    agent.capture_field_write("Foo", "items", None, Some(a.clone()), Some(&model), &no_resolve, false);
    agent.capture_field_write("Foo", "items", None, Some(b.clone()), Some(&model), &no_resolve, false);
    agent.capture_inline(&b, IdentityKey::new(Arc::new("x")), true, false);

    println!("field modifications: {}", agent.get_field_modifications(&locator).len());
    println!("modifications on A: {}", agent.get_container_modifications(&a).len());
    println!("modifications on B: {}", agent.get_container_modifications(&b).len());
}

fn scenario_map_put_remove(agent: &Agent) {
    use fieldwatch::MapEntryKey;

    agent.register_field("Foo", "entries", "Ljava/util/Map;", &[self_seed("Foo")]);
    let map = IdentityKey::new(Arc::new(()));
    agent.set_tracking_enabled("Foo", "entries", true);
    let model = map_model("java/util/HashMap");
    agent.capture_field_write("Foo", "entries", None, Some(map.clone()), Some(&model), &no_resolve, false);

    let k = Arc::new("k");
    let v1: Arc<dyn std::any::Any + Send + Sync> = Arc::new("v1");
    let v2: Arc<dyn std::any::Any + Send + Sync> = Arc::new("v2");
    let entry1 = IdentityKey::new(Arc::new(MapEntryKey::new(k.clone(), v1)));
    let entry2 = IdentityKey::new(Arc::new(MapEntryKey::new(k, v2)));

    agent.capture_inline(&map, entry1, true, false);
    agent.capture_inline(&map, entry2.clone(), true, false);
    agent.capture_inline(&map, entry2, false, false);

    println!("map history entries: {}", agent.get_container_modifications(&map).len());
}

fn scenario_inherited_field(agent: &Agent) {
    agent.register_field(
        "com/example/Base",
        "items",
        "Ljava/util/List;",
        &[SeedClass {
            symbolic_name: "com/example/Derived".to_owned(),
            ancestry: vec!["com/example/Derived".to_owned(), "com/example/Base".to_owned()],
        }],
    );
    let owner = agent
        .catalog()
        .lookup_owner("com/example/Derived", "items")
        .unwrap_or_else(|| "<unresolved>".to_owned());
    println!("writes through com/example/Derived.items resolve to {owner}");
}

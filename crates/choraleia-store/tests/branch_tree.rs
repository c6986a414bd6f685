// Branch-tree semantics the agent engine depends on: sibling ordering,
// uniqueness, linear-path derivation, and edit branching.

use choraleia_core::types::{
    ConversationId, RuntimeType, Workspace, WorkspaceId, WorkspaceRuntime, WorkspaceStatus,
};
use choraleia_store::types::{
    Conversation, ConversationStatus, MessagePart, MessageStatus, Role,
};
use choraleia_store::Store;

fn seed(store: &Store) -> ConversationId {
    let now = chrono::Utc::now().to_rfc3339();
    let ws = Workspace {
        id: WorkspaceId::new(),
        name: "dev".into(),
        description: String::new(),
        color: String::new(),
        status: WorkspaceStatus::Stopped,
        runtime: WorkspaceRuntime {
            runtime_type: RuntimeType::Local,
            docker_asset_id: None,
            container_mode: None,
            container_id: None,
            container_name: None,
            container_ip: None,
            new_container_image: None,
            new_container_name: None,
            work_dir_host: "/tmp".into(),
            work_dir_container: None,
        },
        asset_ids: vec![],
        tools: vec![],
        active_room_id: None,
        memory_enabled: false,
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    store.insert_workspace(&ws).unwrap();

    let conv = Conversation {
        id: ConversationId::new(),
        workspace_id: ws.id,
        room_id: None,
        title: String::new(),
        model_id: None,
        status: ConversationStatus::Active,
        active_leaf_id: None,
        compressed_at: None,
        compression_count: 0,
        summary: None,
        key_topics: vec![],
        key_decisions: vec![],
        created_at: now.clone(),
        updated_at: now,
    };
    store.insert_conversation(&conv).unwrap();
    conv.id
}

fn text(t: &str) -> Vec<MessagePart> {
    vec![MessagePart::Text {
        text: t.into(),
        round_index: 0,
    }]
}

#[test]
fn branch_indices_are_contiguous_from_zero() {
    let store = Store::open_in_memory().unwrap();
    let conv = seed(&store);

    let root = store
        .insert_message(&conv, Role::User, None, text("u1"), MessageStatus::Completed)
        .unwrap();
    assert_eq!(root.branch_index, 0);

    let a = store
        .insert_message(&conv, Role::Assistant, Some(&root.id), text("a"), MessageStatus::Completed)
        .unwrap();
    let b = store
        .insert_message(&conv, Role::Assistant, Some(&root.id), text("b"), MessageStatus::Completed)
        .unwrap();
    let c = store
        .insert_message(&conv, Role::Assistant, Some(&root.id), text("c"), MessageStatus::Completed)
        .unwrap();

    assert_eq!((a.branch_index, b.branch_index, c.branch_index), (0, 1, 2));

    let children = store.children(&conv, Some(&root.id)).unwrap();
    let indices: Vec<i64> = children.iter().map(|m| m.branch_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[test]
fn root_siblings_are_ordered_too() {
    let store = Store::open_in_memory().unwrap();
    let conv = seed(&store);

    let r0 = store
        .insert_message(&conv, Role::User, None, text("first"), MessageStatus::Completed)
        .unwrap();
    let r1 = store
        .insert_message(&conv, Role::User, None, text("second"), MessageStatus::Completed)
        .unwrap();
    assert_eq!(r0.branch_index, 0);
    assert_eq!(r1.branch_index, 1);
}

#[test]
fn parent_must_exist_in_same_conversation() {
    let store = Store::open_in_memory().unwrap();
    let conv = seed(&store);

    // Second conversation in the same workspace.
    let ws_id = store.get_conversation(&conv).unwrap().workspace_id;
    let now = chrono::Utc::now().to_rfc3339();
    let other = Conversation {
        id: ConversationId::new(),
        workspace_id: ws_id,
        room_id: None,
        title: String::new(),
        model_id: None,
        status: ConversationStatus::Active,
        active_leaf_id: None,
        compressed_at: None,
        compression_count: 0,
        summary: None,
        key_topics: vec![],
        key_decisions: vec![],
        created_at: now.clone(),
        updated_at: now,
    };
    store.insert_conversation(&other).unwrap();

    let root = store
        .insert_message(&conv, Role::User, None, text("u1"), MessageStatus::Completed)
        .unwrap();

    // same parent id, wrong conversation
    let err = store.insert_message(
        &other.id,
        Role::Assistant,
        Some(&root.id),
        text("x"),
        MessageStatus::Pending,
    );
    assert!(err.is_err());
}

#[test]
fn edit_creates_sibling_and_preserves_original_branch() {
    // S4: u1 -> a1 -> u2 -> a2, then edit(u2) creates u2' and a2'.
    let store = Store::open_in_memory().unwrap();
    let conv = seed(&store);

    let u1 = store
        .insert_message(&conv, Role::User, None, text("u1"), MessageStatus::Completed)
        .unwrap();
    let a1 = store
        .insert_message(&conv, Role::Assistant, Some(&u1.id), text("a1"), MessageStatus::Completed)
        .unwrap();
    let u2 = store
        .insert_message(&conv, Role::User, Some(&a1.id), text("u2"), MessageStatus::Completed)
        .unwrap();
    let a2 = store
        .insert_message(&conv, Role::Assistant, Some(&u2.id), text("a2"), MessageStatus::Completed)
        .unwrap();

    // Edit: sibling of u2 under the same parent (a1), fresh assistant child.
    let u2_prime = store
        .insert_message(&conv, Role::User, Some(&a1.id), text("u2'"), MessageStatus::Completed)
        .unwrap();
    let a2_prime = store
        .insert_message(&conv, Role::Assistant, Some(&u2_prime.id), vec![], MessageStatus::Pending)
        .unwrap();
    store.set_active_leaf(&conv, &a2_prime.id).unwrap();

    assert_eq!(u2.branch_index, 0);
    assert_eq!(u2_prime.branch_index, 1);

    // Original branch remains reachable.
    let original = store.linear_path(&a2.id).unwrap();
    let texts: Vec<String> = original.iter().map(|m| m.text()).collect();
    assert_eq!(texts, vec!["u1", "a1", "u2", "a2"]);

    // New branch is the active path.
    let active_leaf = store.get_conversation(&conv).unwrap().active_leaf_id.unwrap();
    let path = store.linear_path(&active_leaf).unwrap();
    let texts: Vec<String> = path.iter().map(|m| m.text()).collect();
    assert_eq!(texts, vec!["u1", "a1", "u2'", ""]);
}

#[test]
fn persist_then_reload_preserves_parts() {
    let store = Store::open_in_memory().unwrap();
    let conv = seed(&store);

    let parts = vec![
        MessagePart::Text {
            text: "checking".into(),
            round_index: 0,
        },
        MessagePart::ToolCall {
            id: "call_0".into(),
            name: "terminal_exec_command".into(),
            arguments: r#"{"command":"echo hi"}"#.into(),
            round_index: 0,
        },
        MessagePart::ToolResult {
            tool_call_id: "call_0".into(),
            name: "terminal_exec_command".into(),
            content: "hi".into(),
            round_index: 0,
        },
        MessagePart::Text {
            text: "done".into(),
            round_index: 1,
        },
    ];

    let msg = store
        .insert_message(&conv, Role::Assistant, None, parts.clone(), MessageStatus::Completed)
        .unwrap();

    let reloaded = store.get_message(&msg.id).unwrap();
    assert_eq!(reloaded.parts, parts);
    assert_eq!(reloaded.role, Role::Assistant);
}

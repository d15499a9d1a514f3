use autocabling_statestore::{MacStatus, StateStore};

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.db");

    {
        let store = StateStore::open(&path).unwrap();
        store
            .update_observation("aa:bb:cc:dd:ee:01", "sw1", "Ethernet5", Some(10), 2)
            .unwrap();
    }

    let store = StateStore::open(&path).unwrap();
    let (count, is_stable) = store
        .update_observation("aa:bb:cc:dd:ee:01", "sw1", "Ethernet5", Some(10), 2)
        .unwrap();
    assert_eq!(count, 2);
    assert!(is_stable);

    let state = store.get_state("aa:bb:cc:dd:ee:01").unwrap().unwrap();
    assert_eq!(state.last_switch.as_deref(), Some("sw1"));
    assert_eq!(state.last_status, None);

    store
        .update_status("aa:bb:cc:dd:ee:01", MacStatus::Created, Some(7))
        .unwrap();
    let state = store.get_state("aa:bb:cc:dd:ee:01").unwrap().unwrap();
    assert_eq!(state.last_status, Some(MacStatus::Created));
    assert_eq!(state.cable_id, Some(7));
}

#[test]
fn parent_directory_is_created_on_demand() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a").join("b").join("c").join("state.db");
    assert!(!path.parent().unwrap().exists());

    StateStore::open(&path).unwrap();
    assert!(path.exists());
}

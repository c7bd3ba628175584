use mesh_narray::data::privilege::{MAX_PRIVILEGES, Privilege, PrivilegePack};
use mesh_narray::privilege_pack;

#[test]
fn counts() {
    assert_eq!(privilege_pack![ro].count(), 1);
    assert_eq!(privilege_pack![ro, wo].count(), 2);
    assert_eq!(PrivilegePack::EMPTY.count(), 0);
    assert_eq!(PrivilegePack::repeat(Privilege::Rw, MAX_PRIVILEGES).count(), MAX_PRIVILEGES);
}

#[test]
fn temporal_order_is_preserved() {
    let p = privilege_pack![na, ro, wo, rw];
    let modes: Vec<Privilege> = p.iter().collect();
    assert_eq!(modes, vec![Privilege::Na, Privilege::Ro, Privilege::Wo, Privilege::Rw]);
    assert_eq!(p.get(2), Privilege::Wo);
}

#[test]
fn discards() {
    assert!(privilege_pack![wo].discards_existing_data());
    assert!(!privilege_pack![ro].discards_existing_data());
    assert!(privilege_pack![na, wo].discards_existing_data());
    assert!(!privilege_pack![wo, ro].discards_existing_data());
    assert!(!privilege_pack![na].discards_existing_data());
}

#[test]
fn merges() {
    assert_eq!(privilege_pack![ro, rw].merge(), Privilege::Rw);
    assert_eq!(privilege_pack![wo, wo].merge(), Privilege::Wo);
    assert_eq!(privilege_pack![ro, na].merge(), Privilege::Ro);
    assert_eq!(privilege_pack![na, na].merge(), Privilege::Na);
}

#[test]
fn refresh_decision() {
    assert!(privilege_pack![ro].should_refresh());
    assert!(privilege_pack![rw].should_refresh());
    assert!(privilege_pack![wo, rw].should_refresh());
    assert!(!privilege_pack![wo].should_refresh());
    assert!(!privilege_pack![na].should_refresh());
    assert!(!privilege_pack![na, wo].should_refresh());
}

#[test]
fn composition() {
    let a = privilege_pack![ro];
    let b = PrivilegePack::repeat(Privilege::Wo, 2);
    assert_eq!(a.concat(b), privilege_pack![ro, wo, wo]);
    assert_eq!(PrivilegePack::EMPTY.concat(a), a);
    assert_eq!(format!("{}", a.concat(b)), "<ro, wo, wo>");
}

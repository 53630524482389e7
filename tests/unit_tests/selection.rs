use fieldview::callback::CallbackStatus;
use fieldview::mesh::{ElementId, NodeId};
use fieldview::picking::{ElementPickFilter, PickedObject, PickedObjectList};
use fieldview::region::RegionTree;
use fieldview::rendition::{Graphic, GraphicType};
use fieldview::selection::{SelectionChange, SelectionGroup};
use std::cell::RefCell;
use std::rc::Rc;

fn record_summaries(group: &mut SelectionGroup) -> Rc<RefCell<Vec<SelectionChange>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    group.add_callback(move |event| {
        sink.borrow_mut().push(event.summary);
        CallbackStatus::Keep
    });
    log
}

#[test]
fn each_change_is_notified_outside_brackets() {
    let region = RegionTree::new().root();
    let mut group = SelectionGroup::new();
    let log = record_summaries(&mut group);

    assert!(group.add_node(region, NodeId(3)));
    assert!(!group.add_node(region, NodeId(3)));
    assert!(group.remove_node(region, NodeId(3)));
    assert!(!group.remove_node(region, NodeId(3)));
    assert_eq!(*log.borrow(), vec![SelectionChange::ADD, SelectionChange::REMOVE]);
    assert!(group.is_empty());
}

#[test]
fn brackets_coalesce_into_one_summary() {
    let region = RegionTree::new().root();
    let mut group = SelectionGroup::new();
    let log = record_summaries(&mut group);

    group.begin_change();
    group.add_element(region, ElementId(2));
    group.add_element(region, ElementId(1));
    group.remove_element(region, ElementId(2));
    assert!(log.borrow().is_empty());
    group.end_change();
    assert_eq!(*log.borrow(), vec![SelectionChange::ADD | SelectionChange::REMOVE]);
    assert_eq!(group.elements(region).collect::<Vec<_>>(), vec![ElementId(1)]);

    // An empty bracket notifies nobody.
    group.begin_change();
    group.end_change();
    group.end_change();
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn dropping_the_group_sends_final() {
    let region = RegionTree::new().root();
    let mut group = SelectionGroup::new();
    let log = record_summaries(&mut group);
    group.begin_change();
    group.add_node(region, NodeId(1));
    drop(group);
    let last = *log.borrow().last().unwrap();
    assert!(last.contains(SelectionChange::FINAL));
    assert!(last.contains(SelectionChange::ADD));
}

#[test]
fn picked_objects_are_selected_together() {
    let mut tree = RegionTree::new();
    let root = tree.root();
    {
        let mesh = tree.region_mut(root).unwrap().mesh_mut();
        mesh.add_node(NodeId(1));
        mesh.add_node(NodeId(2));
        mesh.add_element(ElementId(7), 2).unwrap();
    }
    tree.add_graphic(root, Graphic::new("nodes", GraphicType::NodePoints))
        .unwrap();
    tree.add_graphic(root, Graphic::new("surfaces", GraphicType::Surfaces))
        .unwrap();

    let mut picked = PickedObjectList::new();
    for (hit, names) in [[1, 0, 2], [1, 0, 1], [1, 0, 2], [2, 7, 0]].iter().enumerate() {
        let mut object = PickedObject::new(hit, 10, 10);
        object.add_rendition(root);
        names.iter().for_each(|name| object.add_subobject(*name));
        picked.push(object);
    }

    let mut group = SelectionGroup::new();
    let log = record_summaries(&mut group);
    assert_eq!(group.select_picked_nodes(&picked, &tree, false), 2);
    assert_eq!(group.select_picked_nodes(&picked, &tree, false), 0);
    assert_eq!(group.select_picked_elements(&picked, &tree, ElementPickFilter::default()), 1);
    assert_eq!(*log.borrow(), vec![SelectionChange::ADD, SelectionChange::ADD]);
    assert_eq!(group.nodes(root).collect::<Vec<_>>(), vec![NodeId(1), NodeId(2)]);
    assert!(group.contains_element(root, ElementId(7)));
    assert!(group.contains_node(root, NodeId(2)));

    group.clear();
    assert!(group.is_empty());
    assert_eq!(log.borrow().last(), Some(&SelectionChange::REMOVE));
}

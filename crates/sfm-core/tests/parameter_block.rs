use sfm_core::{
    sync_pose_from_angle_axis, BlockLayout, Camera, CameraField, FieldSpec, Image, ImageField,
    LayoutError, ParameterBlock,
};

static POSE_FIELDS: [FieldSpec<ImageField>; 2] = [
    FieldSpec::new(ImageField::AngleAxis, 0),
    FieldSpec::new(ImageField::Center, 3),
];
static POSE_LAYOUT: BlockLayout<ImageField> = BlockLayout::new(&POSE_FIELDS, 6);

static OVERLAPPING: [FieldSpec<ImageField>; 2] = [
    FieldSpec::new(ImageField::AngleAxis, 0),
    FieldSpec::new(ImageField::Quaternion, 2),
];

#[test]
fn layouts_report_overlap_and_range_errors() {
    assert!(POSE_LAYOUT.validate().is_ok());
    assert_eq!(POSE_LAYOUT.offset(ImageField::Center), Some(3));
    assert_eq!(POSE_LAYOUT.offset(ImageField::Rotation), None);

    let overlapping = BlockLayout::new(&OVERLAPPING, 6);
    assert!(matches!(
        overlapping.validate(),
        Err(LayoutError::Overlap { .. })
    ));

    let too_short = BlockLayout::new(&POSE_FIELDS, 5);
    assert!(matches!(
        too_short.validate(),
        Err(LayoutError::OutOfRange { field: "C", .. })
    ));
}

#[test]
fn with_layout_addresses_fields_by_name() {
    let block: ParameterBlock<ImageField> =
        ParameterBlock::with_layout(vec![0.1, 0.2, 0.3, 4.0, 5.0, 6.0], &POSE_LAYOUT).unwrap();
    assert_eq!(block.value(ImageField::AngleAxis).unwrap(), &[0.1, 0.2, 0.3]);
    assert_eq!(block.value(ImageField::Center).unwrap(), &[4.0, 5.0, 6.0]);
    assert_eq!(
        block.value(ImageField::Quaternion),
        Err(LayoutError::MissingField("q"))
    );
    assert!(block.check_layout(&POSE_LAYOUT).is_ok());

    assert_eq!(
        ParameterBlock::<ImageField>::with_layout(vec![0.0; 4], &POSE_LAYOUT),
        Err(LayoutError::WrongLength {
            expected: 6,
            got: 4
        })
    );
}

#[test]
fn exchange_keeps_offsets_disjoint() {
    let mut camera = Camera::from_values(vec![10.0, 20.0, 30.0]);
    camera.set_offset(CameraField::FocalLength, 0);
    camera.set_offset(CameraField::Cx, 1);
    camera.set_offset(CameraField::Cy, 2);

    camera.exchange(CameraField::Cy, 0).unwrap();
    assert_eq!(camera.values(), &[30.0, 20.0, 10.0]);
    assert_eq!(camera.offset(CameraField::Cy), Some(0));
    assert_eq!(camera.offset(CameraField::FocalLength), Some(2));
    assert_eq!(camera.value(CameraField::FocalLength).unwrap(), &[10.0]);

    let mut offsets: Vec<usize> = camera.offsets().map(|(_, o)| o).collect();
    offsets.sort_unstable();
    assert_eq!(offsets, vec![0, 1, 2]);
}

#[test]
fn exchange_rejects_vector_fields() {
    let mut image = Image::from_values(vec![0.0; 6]);
    image.set_offset(ImageField::AngleAxis, 0);
    assert!(matches!(
        image.exchange(ImageField::AngleAxis, 3),
        Err(LayoutError::WidthMismatch { field: "aa", .. })
    ));
}

#[test]
fn pose_sync_requires_all_encodings() {
    let mut image = ParameterBlock::with_layout(vec![0.0; 6], &POSE_LAYOUT).unwrap();
    assert_eq!(
        sync_pose_from_angle_axis(&mut image),
        Err(LayoutError::MissingField("q"))
    );
}

macro_rules! def_units {
    ($t: ident, $doc: expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        pub struct $t<T>(pub T);

        impl<T> $t<T> {
            pub fn into_inner(self) -> T {
                self.0
            }

            pub fn map<S>(self, mut f: impl FnMut(T) -> S) -> $t<S> {
                $t(f(self.0))
            }
        }
    };
}

def_units!(VoxelUnits, "Denotes that the inner `T` is given in units of voxels.");
def_units!(BlockUnits, "Denotes that the inner `T` is given in units of voxel blocks.");
def_units!(WorldUnits, "Denotes that the inner `T` is given in world units (meters).");
